//! Record store adapter for the `laboratorios` collection.
//!
//! Mutations propagate translated errors to the caller. Reads degrade to an
//! empty result and log the failure. Live-query failures arrive through the
//! subscription callback as `Err`.

use std::sync::Arc;

use crate::auth::Session;
use crate::backend::{DocumentStore, SnapshotResult};
use crate::document::{Direction, DocId, Document, FieldValue, Fields, Query};
use crate::error::LabError;
use crate::form::{parse_count, ValidationError};
use crate::listeners::Subscription;
use crate::model::{LabDraft, LabPatch, LabRecord, LabStatus, Timestamp, UserId};
use crate::sample;

pub const COLLECTION: &str = "laboratorios";

/// Stored field names.
pub mod field {
    pub const NAME: &str = "name";
    pub const LOCATION: &str = "location";
    pub const CAPACITY: &str = "capacity";
    pub const EQUIPMENT_COUNT: &str = "equipmentCount";
    pub const RESPONSIBLE: &str = "responsible";
    pub const STATUS: &str = "status";
    pub const DESCRIPTION: &str = "description";
    pub const CREATED_BY: &str = "createdBy";
    pub const UPDATED_BY: &str = "updatedBy";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

pub struct LabService<S: DocumentStore> {
    store: Arc<S>,
    session: Session,
    collection: String,
}

impl<S: DocumentStore> LabService<S> {
    pub fn new(store: Arc<S>, session: Session) -> Self {
        Self {
            store,
            session,
            collection: COLLECTION.to_string(),
        }
    }

    /// Target a different collection (useful to isolate test data).
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist a new laboratory.
    ///
    /// Requires a ready identity. The stored status is always `active`; both
    /// timestamps are assigned by the store.
    pub async fn create(&self, draft: LabDraft) -> Result<LabRecord, LabError> {
        let identity = self.session.require()?;
        if draft.name.trim().is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        log::debug!("Creating laboratory '{}'", draft.name);

        let mut fields = draft_fields(&draft);
        fields.insert(field::STATUS.into(), FieldValue::string(LabStatus::Active.as_str()));
        fields.insert(field::CREATED_BY.into(), FieldValue::string(identity.uid.as_str()));
        fields.insert(field::UPDATED_BY.into(), FieldValue::string(identity.uid.as_str()));
        fields.insert(field::CREATED_AT.into(), FieldValue::ServerTimestamp);
        fields.insert(field::UPDATED_AT.into(), FieldValue::ServerTimestamp);

        match self.store.create_document(&self.collection, fields).await {
            Ok(doc) => {
                log::info!("Laboratory created with id {}", doc.id);
                Ok(record_from_document(&doc))
            }
            Err(err) => {
                log::error!("Failed to create laboratory: {err}");
                Err(LabError::from_store(err))
            }
        }
    }

    /// Merge `patch` into an existing laboratory and re-stamp the update fields.
    ///
    /// Existence is not checked up front; a missing id surfaces as the store's
    /// `not-found` error.
    pub async fn update(&self, id: &DocId, patch: LabPatch) -> Result<(), LabError> {
        let identity = self.session.require()?;
        if patch.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(ValidationError::MissingName.into());
        }
        log::debug!("Updating laboratory {id}");

        let mut fields = patch_fields(&patch);
        fields.insert(field::UPDATED_BY.into(), FieldValue::string(identity.uid.as_str()));
        fields.insert(field::UPDATED_AT.into(), FieldValue::ServerTimestamp);

        self.store
            .update_document(&self.collection, id, fields)
            .await
            .map_err(|err| {
                log::error!("Failed to update laboratory {id}: {err}");
                LabError::from_store(err)
            })?;
        log::info!("Laboratory {id} updated");
        Ok(())
    }

    pub async fn delete(&self, id: &DocId) -> Result<(), LabError> {
        log::debug!("Deleting laboratory {id}");
        self.store
            .delete_document(&self.collection, id)
            .await
            .map_err(|err| {
                log::error!("Failed to delete laboratory {id}: {err}");
                LabError::from_store(err)
            })?;
        log::info!("Laboratory {id} deleted");
        Ok(())
    }

    /// All laboratories, newest first. Empty on store failure.
    pub async fn list_all(&self) -> Vec<LabRecord> {
        self.read(newest_first(), "list laboratories").await
    }

    pub async fn find_by_status(&self, status: LabStatus) -> Vec<LabRecord> {
        let query = newest_first().where_eq(field::STATUS, FieldValue::string(status.as_str()));
        self.read(query, "find laboratories by status").await
    }

    pub async fn find_by_responsible(&self, responsible: &str) -> Vec<LabRecord> {
        let query = newest_first().where_eq(field::RESPONSIBLE, FieldValue::string(responsible));
        self.read(query, "find laboratories by responsible").await
    }

    /// Single laboratory by id. `None` when absent or on store failure.
    pub async fn find_by_id(&self, id: &DocId) -> Option<LabRecord> {
        match self.store.get_document(&self.collection, id).await {
            Ok(doc) => doc.as_ref().map(record_from_document),
            Err(err) => {
                log::error!("Failed to fetch laboratory {id}: {err}");
                None
            }
        }
    }

    /// Live feed of all laboratories, newest first.
    ///
    /// Every change delivers the full ordered list. A failure delivers `Err`
    /// once and ends the feed.
    pub fn subscribe(
        &self,
        mut callback: impl FnMut(Result<Vec<LabRecord>, LabError>) + Send + 'static,
    ) -> Subscription {
        log::info!("Starting live feed on '{}'", self.collection);
        self.store.subscribe(
            &self.collection,
            newest_first(),
            Box::new(move |snapshot: &SnapshotResult| match snapshot {
                Ok(docs) => {
                    log::debug!("Live feed delivered {} laboratories", docs.len());
                    callback(Ok(docs.iter().map(record_from_document).collect()));
                }
                Err(err) => {
                    log::error!("Live feed failed: {err}");
                    callback(Err(LabError::from_store(err.clone())));
                }
            }),
        )
    }

    pub fn generate_sample_record(&self) -> LabDraft {
        sample::generate_sample_record()
    }

    async fn read(&self, query: Query, what: &str) -> Vec<LabRecord> {
        match self.store.run_query(&self.collection, &query).await {
            Ok(docs) => {
                log::debug!("{what}: {} results", docs.len());
                docs.iter().map(record_from_document).collect()
            }
            Err(err) => {
                log::error!("Failed to {what}: {err}");
                Vec::new()
            }
        }
    }
}

fn newest_first() -> Query {
    Query::new().order_by(field::CREATED_AT, Direction::Descending)
}

fn draft_fields(draft: &LabDraft) -> Fields {
    let mut fields = Fields::new();
    fields.insert(field::NAME.into(), FieldValue::string(draft.name.trim()));
    fields.insert(field::LOCATION.into(), FieldValue::optional_string(draft.location.as_deref()));
    fields.insert(field::CAPACITY.into(), FieldValue::Integer(i64::from(draft.capacity)));
    fields.insert(
        field::EQUIPMENT_COUNT.into(),
        FieldValue::Integer(i64::from(draft.equipment_count)),
    );
    fields.insert(
        field::RESPONSIBLE.into(),
        FieldValue::optional_string(draft.responsible.as_deref()),
    );
    fields.insert(
        field::DESCRIPTION.into(),
        FieldValue::optional_string(draft.description.as_deref()),
    );
    fields
}

fn patch_fields(patch: &LabPatch) -> Fields {
    let mut fields = Fields::new();
    if let Some(name) = &patch.name {
        fields.insert(field::NAME.into(), FieldValue::string(name.trim()));
    }
    if let Some(location) = &patch.location {
        fields.insert(field::LOCATION.into(), FieldValue::string(location.as_str()));
    }
    if let Some(capacity) = patch.capacity {
        fields.insert(field::CAPACITY.into(), FieldValue::Integer(i64::from(capacity)));
    }
    if let Some(count) = patch.equipment_count {
        fields.insert(field::EQUIPMENT_COUNT.into(), FieldValue::Integer(i64::from(count)));
    }
    if let Some(responsible) = &patch.responsible {
        fields.insert(field::RESPONSIBLE.into(), FieldValue::string(responsible.as_str()));
    }
    if let Some(status) = patch.status {
        fields.insert(field::STATUS.into(), FieldValue::string(status.as_str()));
    }
    if let Some(description) = &patch.description {
        fields.insert(field::DESCRIPTION.into(), FieldValue::string(description.as_str()));
    }
    fields
}

/// Decode a stored document, coercing fields written by other clients.
pub fn record_from_document(doc: &Document) -> LabRecord {
    let text = |name: &str| doc.get(name).and_then(FieldValue::as_str).map(str::to_string);
    let count = |name: &str| match doc.get(name) {
        Some(FieldValue::Integer(value)) => u32::try_from((*value).max(0)).unwrap_or(u32::MAX),
        Some(FieldValue::String(raw)) => parse_count(raw),
        _ => 0,
    };
    let time = |name: &str, fallback: Timestamp| {
        doc.get(name)
            .and_then(FieldValue::as_timestamp)
            .unwrap_or(fallback)
    };

    LabRecord {
        id: doc.id.clone(),
        name: text(field::NAME).unwrap_or_default(),
        location: text(field::LOCATION),
        capacity: count(field::CAPACITY),
        equipment_count: count(field::EQUIPMENT_COUNT),
        responsible: text(field::RESPONSIBLE),
        status: text(field::STATUS)
            .and_then(|raw| LabStatus::parse(&raw))
            .unwrap_or_default(),
        description: text(field::DESCRIPTION),
        created_by: text(field::CREATED_BY).map(UserId::new),
        updated_by: text(field::UPDATED_BY).map(UserId::new),
        created_at: time(field::CREATED_AT, doc.create_time),
        updated_at: time(field::UPDATED_AT, doc.update_time),
    }
}
