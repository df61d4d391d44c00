//! Raw form input and its coercion into a typed [`LabDraft`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{LabDraft, LabStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Nome do laboratório é obrigatório")]
    MissingName,

    #[error("Status desconhecido: {0}")]
    UnknownStatus(String),
}

/// Text exactly as typed into the record-entry form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabForm {
    pub name: String,
    pub location: String,
    pub capacity: String,
    pub equipment_count: String,
    pub responsible: String,
    pub status: String,
}

impl LabForm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Coerce the form into a draft.
    ///
    /// The name must be non-blank. Counts go through [`parse_count`]. An empty
    /// status selects the default; any other unrecognised value is rejected.
    pub fn validate(&self) -> Result<LabDraft, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }

        let status = match self.status.trim() {
            "" => LabStatus::default(),
            raw => LabStatus::parse(raw).ok_or_else(|| ValidationError::UnknownStatus(raw.to_string()))?,
        };

        Ok(LabDraft {
            name: name.to_string(),
            location: non_blank(&self.location),
            capacity: parse_count(&self.capacity),
            equipment_count: parse_count(&self.equipment_count),
            responsible: non_blank(&self.responsible),
            status,
            description: None,
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Loose non-negative integer parse.
///
/// Reads an optional sign and the leading run of digits, ignoring anything
/// after it (`"30 alunos"` is 30). Empty, non-numeric and negative input is 0;
/// values beyond `u32::MAX` saturate.
pub fn parse_count(raw: &str) -> u32 {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits: &str = {
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map_or(rest.len(), |(i, _)| i);
        &rest[..end]
    };

    if digits.is_empty() || negative {
        return 0;
    }

    digits.bytes().fold(0u32, |acc, b| {
        acc.saturating_mul(10).saturating_add(u32::from(b - b'0'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("30"), 30);
        assert_eq!(parse_count("  42"), 42);
        assert_eq!(parse_count("+7"), 7);
        assert_eq!(parse_count("30 alunos"), 30);
        assert_eq!(parse_count("12.9"), 12);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("abc"), 0);
        assert_eq!(parse_count("-5"), 0);
        assert_eq!(parse_count("-"), 0);
        assert_eq!(parse_count("99999999999"), u32::MAX);
    }

    #[test]
    fn test_validate_scenario() {
        let form = LabForm {
            name: "Lab A".into(),
            capacity: "30".into(),
            equipment_count: "".into(),
            status: "closed".into(),
            ..LabForm::default()
        };
        let draft = form.validate().unwrap();
        assert_eq!(draft.name, "Lab A");
        assert_eq!(draft.capacity, 30);
        assert_eq!(draft.equipment_count, 0);
        assert_eq!(draft.status, LabStatus::Closed);
        assert_eq!(draft.location, None);
    }

    #[test]
    fn test_validate_requires_name() {
        assert_eq!(LabForm::new("   ").validate(), Err(ValidationError::MissingName));
        assert_eq!(LabForm::default().validate(), Err(ValidationError::MissingName));
    }

    #[test]
    fn test_validate_rejects_unknown_status() {
        let form = LabForm {
            status: "demolished".into(),
            ..LabForm::new("Lab")
        };
        assert_eq!(
            form.validate(),
            Err(ValidationError::UnknownStatus("demolished".into()))
        );
    }

    #[test]
    fn test_validate_trims_optional_fields() {
        let form = LabForm {
            location: "  Bloco A ".into(),
            responsible: "   ".into(),
            ..LabForm::new(" Química ")
        };
        let draft = form.validate().unwrap();
        assert_eq!(draft.name, "Química");
        assert_eq!(draft.location.as_deref(), Some("Bloco A"));
        assert_eq!(draft.responsible, None);
        assert_eq!(draft.status, LabStatus::Active);
    }

    #[test]
    fn test_clear() {
        let mut form = LabForm::new("Lab");
        form.capacity = "10".into();
        form.clear();
        assert_eq!(form, LabForm::default());
    }
}
