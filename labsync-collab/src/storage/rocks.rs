//! RocksDB-backed durable copy of the authoritative collections.
//!
//! Column families:
//! - `documents` — bincode-encoded documents (LZ4 compressed), keyed `collection \0 id`
//! - `metadata`  — the server clock high-water mark
//!
//! Every write commits the document change and the clock in one batch, so a
//! reopened store never hands out a timestamp at or below one already stored.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

use labsync_core::{DocId, Document, Timestamp};

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

const CLOCK_KEY: &[u8] = b"clock";

/// On-disk storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("labsync_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Compression error: {0}")]
    CompressionError(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::DatabaseError(e.to_string())
    }
}

/// Persistent document table.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StorageConfig,
}

impl RocksStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened document storage at {}", config.path.display());

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StorageConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_DOCUMENTS => {
                // Values are already LZ4 block-compressed.
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(2);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(8);
            }
            _ => {}
        }

        opts
    }

    // ─── Documents ────────────────────────────────────────────────────

    /// Write `doc` and advance the stored clock to `clock` in one batch.
    pub fn put_document(&self, collection: &str, doc: &Document, clock: Timestamp) -> Result<(), StorageError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_docs, Self::document_key(collection, &doc.id), encode_document(doc)?);
        batch.put_cf(&cf_meta, CLOCK_KEY, clock.as_micros().to_be_bytes());
        self.write(batch)
    }

    pub fn delete_document(&self, collection: &str, id: &DocId, clock: Timestamp) -> Result<(), StorageError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_docs, Self::document_key(collection, id));
        batch.put_cf(&cf_meta, CLOCK_KEY, clock.as_micros().to_be_bytes());
        self.write(batch)
    }

    pub fn load_document(&self, collection: &str, id: &DocId) -> Result<Option<Document>, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, Self::document_key(collection, id))? {
            Some(bytes) => decode_document(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Every stored document with its collection name.
    pub fn load_all(&self) -> Result<Vec<(String, Document)>, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut docs = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let Some(split) = key.iter().position(|b| *b == 0) else {
                log::warn!("Skipping malformed document key ({} bytes)", key.len());
                continue;
            };
            let collection = String::from_utf8(key[..split].to_vec())
                .map_err(|e| StorageError::DeserializationError(e.to_string()))?;
            docs.push((collection, decode_document(&value)?));
        }

        Ok(docs)
    }

    pub fn document_count(&self) -> Result<usize, StorageError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut count = 0;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    // ─── Metadata ─────────────────────────────────────────────────────

    /// Highest clock reading ever committed, `EPOCH` for a fresh store.
    pub fn clock(&self) -> Result<Timestamp, StorageError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, CLOCK_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::DeserializationError("Invalid clock value".into()))?;
                Ok(Timestamp(u64::from_be_bytes(raw)))
            }
            None => Ok(Timestamp::EPOCH),
        }
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn document_key(collection: &str, id: &DocId) -> Vec<u8> {
        let mut key = Vec::with_capacity(collection.len() + 1 + id.as_str().len());
        key.extend_from_slice(collection.as_bytes());
        key.push(0);
        key.extend_from_slice(id.as_str().as_bytes());
        key
    }
}

fn encode_document(doc: &Document) -> Result<Vec<u8>, StorageError> {
    let encoded = bincode::serde::encode_to_vec(doc, bincode::config::standard())
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&encoded))
}

fn decode_document(bytes: &[u8]) -> Result<Document, StorageError> {
    let decompressed = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StorageError::CompressionError(e.to_string()))?;
    let (doc, _) = bincode::serde::decode_from_slice(&decompressed, bincode::config::standard())
        .map_err(|e| StorageError::DeserializationError(e.to_string()))?;
    Ok(doc)
}
