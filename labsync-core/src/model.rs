//! Laboratory records and the identity that attributes writes to them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Server-assigned point in time, microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Wall-clock time right now.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Self(micros as u64)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }
}

/// Opaque identifier issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for a new anonymous session.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An anonymous identity. Replaced wholesale on session reset, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uid: UserId,
}

impl Identity {
    pub fn new(uid: UserId) -> Self {
        Self { uid }
    }

    /// Shortened form for display: the first 8 characters followed by `...`.
    pub fn display_id(&self) -> String {
        let head: String = self.uid.as_str().chars().take(8).collect();
        format!("{head}...")
    }
}

/// Operating status of a laboratory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    #[default]
    Active,
    Maintenance,
    Closed,
}

impl LabStatus {
    pub const ALL: [LabStatus; 3] = [LabStatus::Active, LabStatus::Maintenance, LabStatus::Closed];

    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LabStatus::Active => "active",
            LabStatus::Maintenance => "maintenance",
            LabStatus::Closed => "closed",
        }
    }

    /// Parse the stored representation. Case and surrounding whitespace are ignored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(LabStatus::Active),
            "maintenance" => Some(LabStatus::Maintenance),
            "closed" => Some(LabStatus::Closed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LabStatus::Active => "Ativo",
            LabStatus::Maintenance => "Manutenção",
            LabStatus::Closed => "Fechado",
        }
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted laboratory as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabRecord {
    pub id: crate::document::DocId,
    pub name: String,
    pub location: Option<String>,
    pub capacity: u32,
    pub equipment_count: u32,
    pub responsible: Option<String>,
    pub status: LabStatus,
    pub description: Option<String>,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Fully typed input for creating a laboratory.
///
/// `status` is carried for completeness but creation always persists
/// [`LabStatus::Active`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabDraft {
    pub name: String,
    pub location: Option<String>,
    pub capacity: u32,
    pub equipment_count: u32,
    pub responsible: Option<String>,
    pub status: LabStatus,
    pub description: Option<String>,
}

impl LabDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update. `None` leaves the stored field untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<u32>,
    pub equipment_count: Option<u32>,
    pub responsible: Option<String>,
    pub status: Option<LabStatus>,
    pub description: Option<String>,
}

impl LabPatch {
    pub fn status(status: LabStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Aggregates shown alongside the record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LabStats {
    pub total: usize,
    pub active: usize,
    pub total_capacity: u64,
}

impl LabStats {
    pub fn from_records(records: &[LabRecord]) -> Self {
        records.iter().fold(Self::default(), |mut stats, lab| {
            stats.total += 1;
            if lab.status == LabStatus::Active {
                stats.active += 1;
            }
            stats.total_capacity += u64::from(lab.capacity);
            stats
        })
    }
}
