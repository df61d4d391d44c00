//! # labsync-core — Laboratory records over a hosted document store
//!
//! Adapters that sit between the application controller and the two hosted
//! collaborators: an anonymous identity provider and a realtime document
//! store. Both collaborators are traits so they can be backed in-process, by
//! a remote sync server, or by test fakes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   identity events   ┌──────────────────┐
//! │   AuthAdapter    │ ──────────────────► │  AppController   │
//! │ (IdentityService)│                     │  (labsync-app)   │
//! └────────┬─────────┘                     └────────┬─────────┘
//!          │ Session                                │ create / delete / feed
//!          ▼                                        ▼
//! ┌──────────────────┐    Fields / Query   ┌──────────────────┐
//! │    LabService    │ ──────────────────► │  DocumentStore   │
//! │ (laboratorios)   │ ◄────────────────── │ (live snapshots) │
//! └──────────────────┘  Vec<Document>      └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`model`] — Laboratory records, drafts, patches and stats
//! - [`document`] — Schemaless documents, field values and queries
//! - [`backend`] — The `DocumentStore` and `IdentityService` traits
//! - [`auth`] — Identity provider adapter and shared session
//! - [`service`] — Record store adapter for the `laboratorios` collection
//! - [`form`] — Raw form input and count coercion
//! - [`listeners`] — Observer registry with RAII subscriptions
//! - [`sample`] — Randomised demo records

pub mod auth;
pub mod backend;
pub mod document;
pub mod error;
pub mod form;
pub mod listeners;
pub mod model;
pub mod sample;
pub mod service;

pub use auth::{AuthAdapter, RetryPolicy, Session};
pub use backend::{AuthStateCallback, DocumentStore, IdentityService, SnapshotCallback, SnapshotResult};
pub use document::{resolve_fields, Direction, DocId, Document, FieldValue, Fields, Filter, OrderBy, Query};
pub use error::{BackendError, ErrorCode, LabError};
pub use form::{parse_count, LabForm, ValidationError};
pub use listeners::{Listener, ListenerRegistry, Subscription};
pub use model::{Identity, LabDraft, LabPatch, LabRecord, LabStats, LabStatus, Timestamp, UserId};
pub use service::{record_from_document, LabService, COLLECTION};
