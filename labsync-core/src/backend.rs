//! Interfaces of the two hosted collaborators: the document store and the
//! anonymous identity service.

use std::future::Future;

use crate::document::{DocId, Document, Fields, Query};
use crate::error::BackendError;
use crate::listeners::Subscription;
use crate::model::UserId;

/// Payload of one live-query delivery: the full ordered result set, or the
/// error that terminated the query.
pub type SnapshotResult = Result<Vec<Document>, BackendError>;

pub type SnapshotCallback = Box<dyn FnMut(&SnapshotResult) + Send>;

pub type AuthStateCallback = Box<dyn FnMut(&Option<UserId>) + Send>;

/// A hosted, schemaless document database.
///
/// Timestamps carried as [`crate::FieldValue::ServerTimestamp`] are assigned
/// by the store at write time.
pub trait DocumentStore: Send + Sync {
    /// Insert a new document under a store-generated id and return it as stored.
    fn create_document(
        &self,
        collection: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<Document, BackendError>> + Send;

    /// Merge `fields` into an existing document.
    fn update_document(
        &self,
        collection: &str,
        id: &DocId,
        fields: Fields,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn delete_document(
        &self,
        collection: &str,
        id: &DocId,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn get_document(
        &self,
        collection: &str,
        id: &DocId,
    ) -> impl Future<Output = Result<Option<Document>, BackendError>> + Send;

    fn run_query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = Result<Vec<Document>, BackendError>> + Send;

    /// Start a live query.
    ///
    /// The listener receives the current result set and then a fresh full
    /// snapshot after every change to the collection, until the returned
    /// handle is released. An error delivery ends the query.
    fn subscribe(&self, collection: &str, query: Query, listener: SnapshotCallback) -> Subscription;
}

/// Issues anonymous identities and reports session changes.
pub trait IdentityService: Send + Sync {
    fn sign_in_anonymously(&self) -> impl Future<Output = Result<UserId, BackendError>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn current_user(&self) -> Option<UserId>;

    /// The listener is called with the current state right away and again on
    /// every sign-in or sign-out.
    fn on_auth_state_changed(&self, listener: AuthStateCallback) -> Subscription;
}
