//! Randomised demo records.

use rand::Rng;

use crate::model::{LabDraft, LabStatus};

const RESPONSIBLES: [&str; 4] = ["Silva", "Santos", "Oliveira", "Souza"];

pub const SAMPLE_DESCRIPTION: &str = "Laboratório equipado para práticas experimentais";

/// A valid random draft drawn from the thread-local generator.
pub fn generate_sample_record() -> LabDraft {
    generate_with(&mut rand::thread_rng())
}

/// Capacity is drawn from 10..=59 and equipment from 5..=24.
pub fn generate_with<R: Rng>(rng: &mut R) -> LabDraft {
    let block = char::from(b'A' + rng.gen_range(0..3u8));
    let responsible = RESPONSIBLES[rng.gen_range(0..RESPONSIBLES.len())];
    let status = LabStatus::ALL[rng.gen_range(0..LabStatus::ALL.len())];

    LabDraft {
        name: format!("Laboratório {}", rng.gen_range(0..100)),
        location: Some(format!("Bloco {block}")),
        capacity: rng.gen_range(10..=59),
        equipment_count: rng.gen_range(5..=24),
        responsible: Some(format!("Prof. {responsible}")),
        status,
        description: Some(SAMPLE_DESCRIPTION.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sample_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let draft = generate_with(&mut rng);
            assert!((10..=59).contains(&draft.capacity));
            assert!((5..=24).contains(&draft.equipment_count));
            assert!(draft.name.starts_with("Laboratório "));
            let location = draft.location.unwrap();
            assert!(["Bloco A", "Bloco B", "Bloco C"].contains(&location.as_str()));
            let responsible = draft.responsible.unwrap();
            assert!(RESPONSIBLES.iter().any(|r| responsible == format!("Prof. {r}")));
            assert_eq!(draft.description.as_deref(), Some(SAMPLE_DESCRIPTION));
        }
    }

    #[test]
    fn test_sample_covers_all_statuses() {
        let mut rng = StdRng::seed_from_u64(11);
        let statuses: Vec<LabStatus> = (0..300).map(|_| generate_with(&mut rng).status).collect();
        for status in LabStatus::ALL {
            assert!(statuses.contains(&status), "{status} never generated");
        }
    }

    #[test]
    fn test_sample_is_valid_draft() {
        let draft = generate_sample_record();
        assert!(!draft.name.trim().is_empty());
    }
}
