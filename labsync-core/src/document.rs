//! Schemaless documents and the queries that select them.
//!
//! A [`Document`] is a flat map of field names to [`FieldValue`]s. Writes may
//! carry the [`FieldValue::ServerTimestamp`] sentinel, which the store replaces
//! with its own clock reading at commit time; documents read back from a store
//! never contain it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::model::Timestamp;

/// Store-assigned document identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A single field value.
///
/// Variant order defines the cross-type sort order used by queries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Timestamp(Timestamp),
    String(String),
    /// Write-only sentinel resolved to the commit time by the store.
    ServerTimestamp,
}

impl FieldValue {
    pub fn string(value: impl Into<String>) -> Self {
        FieldValue::String(value.into())
    }

    /// `Some` becomes a string, `None` becomes null.
    pub fn optional_string(value: Option<&str>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::string)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Replace the server-timestamp sentinel with `now`.
    pub fn resolve(self, now: Timestamp) -> Self {
        match self {
            FieldValue::ServerTimestamp => FieldValue::Timestamp(now),
            other => other,
        }
    }
}

pub type Fields = BTreeMap<String, FieldValue>;

/// Resolve every server-timestamp sentinel in `fields`.
pub fn resolve_fields(fields: Fields, now: Timestamp) -> Fields {
    fields
        .into_iter()
        .map(|(name, value)| (name, value.resolve(now)))
        .collect()
}

/// A stored document with its store metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub fields: Fields,
    pub create_time: Timestamp,
    pub update_time: Timestamp,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Equality filter on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Selection and ordering over one collection.
///
/// Documents lacking the order-by field are excluded from ordered results,
/// and ties are broken on document id in the same direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub filter: Option<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.filter = Some(Filter {
            field: field.into(),
            value,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(filter) = &self.filter {
            if doc.get(&filter.field) != Some(&filter.value) {
                return false;
            }
        }
        if let Some(order) = &self.order_by {
            if doc.get(&order.field).is_none() {
                return false;
            }
        }
        true
    }

    /// Filter and sort `docs`, returning owned copies.
    pub fn apply<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.matches(doc))
            .cloned()
            .collect();

        match &self.order_by {
            Some(order) => {
                selected.sort_by(|a, b| {
                    let ordering = a
                        .get(&order.field)
                        .cmp(&b.get(&order.field))
                        .then_with(|| a.id.cmp(&b.id));
                    match order.direction {
                        Direction::Ascending => ordering,
                        Direction::Descending => ordering.reverse(),
                    }
                });
            }
            None => selected.sort_by(|a, b| a.id.cmp(&b.id)),
        }
        selected
    }
}
