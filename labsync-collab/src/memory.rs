//! Authoritative in-memory document store with live queries.
//!
//! Writes are serialized through one state lock. Each write assigns the next
//! server timestamp (strictly increasing, even across restarts when backed by
//! [`RocksStore`]) and recomputes the result set of every live query on the
//! touched collection. Snapshots are computed under the lock and delivered
//! after it is released, so a listener may call back into the store.
//!
//! Each live query drains its snapshots on one thread at a time. A snapshot
//! offered while another is being delivered replaces any queued one and is
//! picked up by the draining thread, so a listener sees revisions in order
//! and always ends on the newest.
//!
//! Lock order: `state` before `live`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use labsync_core::listeners::{lock, Listener};
use labsync_core::{
    resolve_fields, BackendError, DocId, Document, DocumentStore, Fields, Query, SnapshotCallback,
    SnapshotResult, Subscription, Timestamp,
};

use crate::storage::{RocksStore, StorageConfig, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    Allow,
    Deny,
}

/// Security rules applied to every client operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreRules {
    pub read: Access,
    pub write: Access,
}

impl StoreRules {
    pub fn open() -> Self {
        Self::default()
    }

    /// Deny everything.
    pub fn locked() -> Self {
        Self {
            read: Access::Deny,
            write: Access::Deny,
        }
    }
}

/// Outcome of deleting an id that is not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDeletePolicy {
    /// Succeed without effect.
    #[default]
    Ignore,
    /// Fail with `not-found`.
    Fail,
}

#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub rules: StoreRules,
    pub missing_delete: MissingDeletePolicy,
    /// Write-through persistence (None = in-memory only)
    pub storage: Option<StorageConfig>,
}

impl StoreConfig {
    pub fn persistent(storage: StorageConfig) -> Self {
        Self {
            storage: Some(storage),
            ..Self::default()
        }
    }
}

struct State {
    collections: HashMap<String, BTreeMap<DocId, Document>>,
    clock: Timestamp,
    /// Bumped on every committed write; orders snapshot deliveries.
    revision: u64,
}

impl State {
    fn next_timestamp(&mut self) -> Timestamp {
        let next = Timestamp::now().max(Timestamp(self.clock.as_micros() + 1));
        self.clock = next;
        next
    }

    fn documents(&self, collection: &str) -> impl Iterator<Item = &Document> {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|docs| docs.values())
    }
}

struct LiveQuery {
    collection: String,
    query: Query,
    listener: Arc<Listener<SnapshotResult>>,
    outbox: Mutex<Outbox>,
}

#[derive(Default)]
struct Outbox {
    /// Revision of the newest snapshot handed to the listener.
    delivered: u64,
    queued: Option<(u64, SnapshotResult)>,
    draining: bool,
}

impl LiveQuery {
    fn id(&self) -> u64 {
        self.listener.id()
    }

    /// Queue a snapshot unless a newer one is already queued or delivered.
    /// Returns `true` when the caller has to drain.
    fn offer(&self, revision: u64, result: SnapshotResult) -> bool {
        let mut outbox = lock(&self.outbox);
        let newest = outbox
            .queued
            .as_ref()
            .map_or(outbox.delivered, |(queued, _)| *queued);
        if revision <= newest {
            return false;
        }
        outbox.queued = Some((revision, result));
        !std::mem::replace(&mut outbox.draining, true)
    }

    /// Take the queued snapshot, or end the drain when there is none.
    fn next_queued(&self) -> Option<SnapshotResult> {
        let mut outbox = lock(&self.outbox);
        match outbox.queued.take() {
            Some((revision, result)) => {
                outbox.delivered = revision;
                Some(result)
            }
            None => {
                outbox.draining = false;
                None
            }
        }
    }
}

#[derive(Default)]
struct LiveQueries {
    next_id: AtomicU64,
    queries: Mutex<Vec<Arc<LiveQuery>>>,
}

impl LiveQueries {
    fn remove(&self, id: u64) {
        let mut queries = lock(&self.queries);
        if let Some(index) = queries.iter().position(|q| q.id() == id) {
            let removed = queries.remove(index);
            removed.listener.deactivate();
        }
    }
}

/// A computed snapshot waiting to be delivered outside the state lock.
struct PendingSnapshot {
    target: Arc<LiveQuery>,
    revision: u64,
    result: SnapshotResult,
}

/// The hosted document database.
pub struct MemoryStore {
    state: Mutex<State>,
    live: Arc<LiveQueries>,
    rules: RwLock<StoreRules>,
    missing_delete: MissingDeletePolicy,
    storage: Option<RocksStore>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty in-memory store with open rules.
    pub fn new() -> Self {
        Self::build(StoreConfig::default(), None, HashMap::new(), Timestamp::EPOCH)
    }

    /// Open a store, recovering persisted documents when storage is configured.
    pub fn open(config: StoreConfig) -> Result<Self, StorageError> {
        let Some(storage_config) = config.storage.clone() else {
            return Ok(Self::build(config, None, HashMap::new(), Timestamp::EPOCH));
        };

        let storage = RocksStore::open(storage_config)?;
        let mut clock = storage.clock()?;
        let mut collections: HashMap<String, BTreeMap<DocId, Document>> = HashMap::new();
        let mut recovered = 0usize;
        for (collection, doc) in storage.load_all()? {
            clock = clock.max(doc.update_time);
            collections
                .entry(collection)
                .or_default()
                .insert(doc.id.clone(), doc);
            recovered += 1;
        }
        log::info!("Recovered {recovered} documents from {}", storage.path().display());

        Ok(Self::build(config, Some(storage), collections, clock))
    }

    fn build(
        config: StoreConfig,
        storage: Option<RocksStore>,
        collections: HashMap<String, BTreeMap<DocId, Document>>,
        clock: Timestamp,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                collections,
                clock,
                revision: 1,
            }),
            live: Arc::new(LiveQueries::default()),
            rules: RwLock::new(config.rules),
            missing_delete: config.missing_delete,
            storage,
        }
    }

    pub fn rules(&self) -> StoreRules {
        *self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the security rules. Applies from the next operation on.
    pub fn set_rules(&self, rules: StoreRules) {
        log::info!("Store rules changed: read={:?} write={:?}", rules.read, rules.write);
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    pub fn document_count(&self, collection: &str) -> usize {
        lock(&self.state)
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    pub fn live_query_count(&self) -> usize {
        lock(&self.live.queries).len()
    }

    /// Latest timestamp handed out.
    pub fn clock(&self) -> Timestamp {
        lock(&self.state).clock
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Insert under a generated id.
    pub fn insert(&self, collection: &str, fields: Fields) -> Result<Document, BackendError> {
        self.insert_document(collection, DocId::generate(), fields)
    }

    /// Insert under a caller-chosen id. Fails `already-exists` if taken.
    pub fn insert_document(&self, collection: &str, id: DocId, fields: Fields) -> Result<Document, BackendError> {
        self.check_write()?;
        let (doc, pending) = {
            let mut state = lock(&self.state);
            if state
                .collections
                .get(collection)
                .is_some_and(|docs| docs.contains_key(&id))
            {
                return Err(BackendError::already_exists(format!(
                    "Document already exists: {collection}/{id}"
                )));
            }

            let now = state.next_timestamp();
            let doc = Document {
                id,
                fields: resolve_fields(fields, now),
                create_time: now,
                update_time: now,
            };
            self.persist_put(collection, &doc, now)?;
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(doc.id.clone(), doc.clone());
            (doc, self.commit(&mut state, collection))
        };
        log::debug!("Inserted {collection}/{}", doc.id);
        self.deliver(pending);
        Ok(doc)
    }

    /// Merge `fields` into an existing document. Fails `not-found` if absent.
    pub fn merge(&self, collection: &str, id: &DocId, fields: Fields) -> Result<Document, BackendError> {
        self.check_write()?;
        let (doc, pending) = {
            let mut state = lock(&self.state);
            let Some(existing) = state.collections.get(collection).and_then(|docs| docs.get(id)) else {
                return Err(BackendError::not_found(format!(
                    "No document to update: {collection}/{id}"
                )));
            };
            let mut doc = existing.clone();

            let now = state.next_timestamp();
            doc.fields.extend(resolve_fields(fields, now));
            doc.update_time = now;
            self.persist_put(collection, &doc, now)?;
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(doc.id.clone(), doc.clone());
            (doc, self.commit(&mut state, collection))
        };
        log::debug!("Updated {collection}/{id}");
        self.deliver(pending);
        Ok(doc)
    }

    /// Delete a document. A missing id follows the configured policy.
    pub fn remove(&self, collection: &str, id: &DocId) -> Result<(), BackendError> {
        self.check_write()?;
        let pending = {
            let mut state = lock(&self.state);
            let exists = state
                .collections
                .get(collection)
                .is_some_and(|docs| docs.contains_key(id));
            if !exists {
                return match self.missing_delete {
                    MissingDeletePolicy::Ignore => {
                        log::debug!("Delete of missing {collection}/{id} ignored");
                        Ok(())
                    }
                    MissingDeletePolicy::Fail => Err(BackendError::not_found(format!(
                        "No document to delete: {collection}/{id}"
                    ))),
                };
            }

            let now = state.next_timestamp();
            if let Some(storage) = &self.storage {
                storage
                    .delete_document(collection, id, now)
                    .map_err(|e| storage_failure("delete", e))?;
            }
            if let Some(docs) = state.collections.get_mut(collection) {
                docs.remove(id);
            }
            self.commit(&mut state, collection)
        };
        log::debug!("Deleted {collection}/{id}");
        self.deliver(pending);
        Ok(())
    }

    // ─── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, collection: &str, id: &DocId) -> Result<Option<Document>, BackendError> {
        self.check_read()?;
        let state = lock(&self.state);
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    pub fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, BackendError> {
        self.check_read()?;
        let state = lock(&self.state);
        Ok(query.apply(state.documents(collection)))
    }

    /// Register a live query. The current result set is delivered before
    /// this returns. When reads are denied the listener receives the error
    /// once and nothing stays registered.
    pub fn watch(&self, collection: &str, query: Query, listener: SnapshotCallback) -> Subscription {
        let id = self.live.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let live = Arc::new(LiveQuery {
            collection: collection.to_string(),
            query,
            listener: Arc::new(Listener::new(id, listener)),
            outbox: Mutex::new(Outbox::default()),
        });

        let pending = {
            let state = lock(&self.state);
            let result = match self.check_read() {
                Ok(()) => Ok(live.query.apply(state.documents(collection))),
                Err(err) => Err(err),
            };
            if result.is_ok() {
                lock(&self.live.queries).push(live.clone());
            }
            PendingSnapshot {
                target: live,
                revision: state.revision,
                result,
            }
        };

        let registered = pending.result.is_ok();
        log::debug!("Live query {id} on '{collection}' (registered: {registered})");
        self.deliver(vec![pending]);
        if !registered {
            return Subscription::inert();
        }

        let queries: Weak<LiveQueries> = Arc::downgrade(&self.live);
        Subscription::new(move || {
            if let Some(queries) = queries.upgrade() {
                queries.remove(id);
                log::debug!("Live query {id} released");
            }
        })
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn check_read(&self) -> Result<(), BackendError> {
        match self.rules().read {
            Access::Allow => Ok(()),
            Access::Deny => Err(BackendError::permission_denied("Missing or insufficient permissions.")),
        }
    }

    fn check_write(&self) -> Result<(), BackendError> {
        match self.rules().write {
            Access::Allow => Ok(()),
            Access::Deny => Err(BackendError::permission_denied("Missing or insufficient permissions.")),
        }
    }

    fn persist_put(&self, collection: &str, doc: &Document, clock: Timestamp) -> Result<(), BackendError> {
        match &self.storage {
            Some(storage) => storage
                .put_document(collection, doc, clock)
                .map_err(|e| storage_failure("write", e)),
            None => Ok(()),
        }
    }

    /// Bump the revision and compute fresh snapshots for `collection`.
    fn commit(&self, state: &mut State, collection: &str) -> Vec<PendingSnapshot> {
        state.revision += 1;
        let readable = self.check_read();
        lock(&self.live.queries)
            .iter()
            .filter(|live| live.collection == collection)
            .map(|live| PendingSnapshot {
                target: live.clone(),
                revision: state.revision,
                result: match &readable {
                    Ok(()) => Ok(live.query.apply(state.documents(collection))),
                    Err(err) => Err(err.clone()),
                },
            })
            .collect()
    }

    fn deliver(&self, pending: Vec<PendingSnapshot>) {
        for snapshot in pending {
            let live = snapshot.target;
            if !live.offer(snapshot.revision, snapshot.result) {
                continue;
            }
            while let Some(result) = live.next_queued() {
                live.listener.deliver(&result);
                if result.is_err() {
                    self.live.remove(live.id());
                }
            }
        }
    }
}

fn storage_failure(op: &str, err: StorageError) -> BackendError {
    log::error!("Storage {op} failed: {err}");
    BackendError::internal(format!("Storage {op} failed: {err}"))
}

impl DocumentStore for MemoryStore {
    async fn create_document(&self, collection: &str, fields: Fields) -> Result<Document, BackendError> {
        self.insert(collection, fields)
    }

    async fn update_document(&self, collection: &str, id: &DocId, fields: Fields) -> Result<(), BackendError> {
        self.merge(collection, id, fields).map(|_| ())
    }

    async fn delete_document(&self, collection: &str, id: &DocId) -> Result<(), BackendError> {
        self.remove(collection, id)
    }

    async fn get_document(&self, collection: &str, id: &DocId) -> Result<Option<Document>, BackendError> {
        self.get(collection, id)
    }

    async fn run_query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, BackendError> {
        self.query(collection, query)
    }

    fn subscribe(&self, collection: &str, query: Query, listener: SnapshotCallback) -> Subscription {
        self.watch(collection, query, listener)
    }
}
