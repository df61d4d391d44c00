//! # labsync-collab — Hosted backend for labsync
//!
//! Implements the document store and identity collaborators, in-process and
//! over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ RemoteStore │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │    Binary Frames    │ (central)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                            ▼
//!                                     ┌─────────────┐
//!                                     │ MemoryStore │
//!                                     │ (authority) │
//!                                     └──────┬──────┘
//!                                            │ write-through
//!                                    ┌───────┴───────┐
//!                                    │  RocksStore   │
//!                                    │ (durability)  │
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`memory`] — Authoritative document store with live queries and rules
//! - [`storage`] — RocksDB persistence (LZ4-compressed documents)
//! - [`auth`] — In-process anonymous identity issuer
//! - [`protocol`] — Binary wire protocol (bincode-encoded frames)
//! - [`server`] — WebSocket sync server
//! - [`client`] — WebSocket client implementing both collaborator traits

pub mod auth;
pub mod client;
pub mod memory;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use auth::AnonymousAuth;
pub use client::{ConnectionState, RemoteStore};
pub use memory::{Access, MemoryStore, MissingDeletePolicy, StoreConfig, StoreRules};
pub use protocol::{ClientFrame, Operation, ProtocolError, Reply, ServerFrame};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use storage::{RocksStore, StorageConfig, StorageError};
