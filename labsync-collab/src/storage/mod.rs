//! Persistent storage for the authoritative collections.
//!
//! ```text
//! ┌─────────────┐  write-through   ┌──────────────┐
//! │ MemoryStore │ ───────────────► │  RocksStore  │
//! │ (in-memory) │                  │  (RocksDB)   │
//! └──────┬──────┘                  └──────┬───────┘
//!        │                                │
//!        │ on open                        │ column families
//!        ▼                                ▼
//! ┌─────────────┐     ┌──────────────────────────────────┐
//! │ collections │     │ CF "documents" — LZ4 documents   │
//! │ (restored)  │     │ CF "metadata"  — clock watermark │
//! └─────────────┘     └──────────────────────────────────┘
//! ```

pub mod rocks;

pub use rocks::{RocksStore, StorageConfig, StorageError};
