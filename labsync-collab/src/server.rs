//! WebSocket server exposing a [`MemoryStore`] to remote clients.
//!
//! Architecture:
//! ```text
//! Client A ──┐                          ┌── live query ──► Snapshot frames
//!             ├── Connection (session) ──┤
//! Client B ──┘         │                └── request ────► Response frames
//!                      ▼
//!                 MemoryStore ── RocksStore (optional)
//! ```
//!
//! Each connection holds one anonymous session and the live queries it
//! opened. Outgoing frames go through an unbounded channel drained by a
//! writer task, so store listeners never block on the socket. Live queries
//! are released when the connection closes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use labsync_core::{BackendError, SnapshotResult, Subscription, UserId};

use crate::memory::{MemoryStore, StoreConfig};
use crate::protocol::{ClientFrame, Operation, Reply, ServerFrame};
use crate::storage::StorageError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Reject writes from connections without a signed-in session
    pub require_auth: bool,
    /// Backing store settings
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            require_auth: true,
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Ephemeral port, in-memory store.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_requests: u64,
    pub total_bytes: u64,
    pub rejected_writes: u64,
    pub sessions_issued: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<MemoryStore>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Open the configured store (recovering persisted documents) and build the server.
    pub fn new(config: ServerConfig) -> Result<Self, StorageError> {
        let store = Arc::new(MemoryStore::open(config.store.clone())?);
        Ok(Self::with_store(config, store))
    }

    /// Serve an existing store, e.g. one shared with in-process clients.
    pub fn with_store(config: ServerConfig, store: Arc<MemoryStore>) -> Self {
        Self {
            config,
            store,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept WebSocket clients on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let store = self.store.clone();
            let stats = self.stats.clone();
            let require_auth = self.config.require_auth;

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, store, stats, require_auth).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        store: Arc<MemoryStore>,
        stats: Arc<RwLock<ServerStats>>,
        require_auth: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Writer task: forward outgoing frames to the socket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let encoded = match frame.encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        log::error!("Failed to encode frame for {addr}: {e}");
                        continue;
                    }
                };
                if ws_sender.send(Message::Binary(encoded.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let mut connection = Connection {
            store,
            require_auth,
            user: None,
            subscriptions: HashMap::new(),
            out_tx: out_tx.clone(),
        };

        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    let bytes: Vec<u8> = data.into();
                    let frame = match ClientFrame::decode(&bytes) {
                        Ok(frame) => frame,
                        Err(e) => {
                            log::warn!("Failed to decode frame from {addr}: {e}");
                            continue;
                        }
                    };

                    let op_name = frame.op.name();
                    let is_write = frame.op.is_write();
                    let issues_session = matches!(frame.op, Operation::SignIn { .. });
                    let result = connection.handle(frame.op);
                    log::debug!("{addr} {op_name} #{} -> {}", frame.id, if result.is_ok() { "ok" } else { "error" });

                    {
                        let mut s = stats.write().await;
                        s.total_requests += 1;
                        s.total_bytes += bytes.len() as u64;
                        if is_write && result.is_err() {
                            s.rejected_writes += 1;
                        }
                        if issues_session && result.is_ok() {
                            s.sessions_issued += 1;
                        }
                    }

                    if out_tx.send(ServerFrame::response(frame.id, result)).is_err() {
                        break;
                    }
                }

                Ok(Message::Close(_)) => {
                    log::info!("Connection closed from {addr}");
                    break;
                }

                Err(e) => {
                    log::error!("WebSocket error from {addr}: {e}");
                    break;
                }

                _ => {}
            }
        }

        let released = connection.close();
        if released > 0 {
            log::info!("Released {released} live queries for {addr}");
        }

        let mut s = stats.write().await;
        s.active_connections -= 1;

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

/// Per-connection session state.
struct Connection {
    store: Arc<MemoryStore>,
    require_auth: bool,
    user: Option<UserId>,
    subscriptions: HashMap<u64, Subscription>,
    out_tx: mpsc::UnboundedSender<ServerFrame>,
}

impl Connection {
    fn handle(&mut self, op: Operation) -> Result<Reply, BackendError> {
        if op.is_write() && self.require_auth && self.user.is_none() {
            return Err(BackendError::unauthenticated(
                "The request does not have valid authentication credentials.",
            ));
        }

        match op {
            Operation::SignIn { resume } => {
                let uid = resume.unwrap_or_else(UserId::generate);
                log::info!("Session {uid} signed in");
                self.user = Some(uid.clone());
                Ok(Reply::SignedIn(uid))
            }
            Operation::SignOut => {
                if let Some(uid) = self.user.take() {
                    log::info!("Session {uid} signed out");
                }
                Ok(Reply::Done)
            }
            Operation::Create { collection, fields } => {
                self.store.insert(&collection, fields).map(Reply::Document)
            }
            Operation::Update { collection, id, fields } => {
                self.store.merge(&collection, &id, fields).map(|_| Reply::Done)
            }
            Operation::Delete { collection, id } => {
                self.store.remove(&collection, &id).map(|_| Reply::Done)
            }
            Operation::Get { collection, id } => {
                self.store.get(&collection, &id).map(Reply::MaybeDocument)
            }
            Operation::Query { collection, query } => {
                self.store.query(&collection, &query).map(Reply::Documents)
            }
            Operation::Subscribe { subscription, collection, query } => {
                let tx = self.out_tx.clone();
                let handle = self.store.watch(
                    &collection,
                    query,
                    Box::new(move |snapshot: &SnapshotResult| {
                        let _ = tx.send(ServerFrame::snapshot(subscription, snapshot.clone()));
                    }),
                );
                // A denied query has already delivered its error and holds nothing.
                if handle.is_active() {
                    self.subscriptions.insert(subscription, handle);
                }
                Ok(Reply::Done)
            }
            Operation::Unsubscribe { subscription } => {
                self.subscriptions.remove(&subscription);
                Ok(Reply::Done)
            }
            Operation::Ping => Ok(Reply::Pong),
        }
    }

    /// Release every live query. Returns how many were open.
    fn close(&mut self) -> usize {
        let count = self.subscriptions.len();
        self.subscriptions.clear();
        count
    }
}
