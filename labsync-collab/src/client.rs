//! WebSocket client implementing both collaborator traits against a [`crate::SyncServer`].
//!
//! Provides:
//! - Request/response correlation over one connection
//! - Live queries fed by pushed snapshot frames
//! - Anonymous session state with change notifications
//!
//! When the connection drops, every pending request and every live query
//! fails with `network-request-failed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use labsync_core::listeners::lock;
use labsync_core::{
    AuthStateCallback, BackendError, DocId, Document, DocumentStore, Fields, IdentityService, Listener,
    ListenerRegistry, Query, SnapshotCallback, SnapshotResult, Subscription, UserId,
};

use crate::protocol::{ClientFrame, Operation, ProtocolError, Reply, ServerFrame};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type PendingReply = oneshot::Sender<Result<Reply, BackendError>>;

struct Shared {
    state: Mutex<ConnectionState>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    subscriptions: Mutex<HashMap<u64, Arc<Listener<SnapshotResult>>>>,
    user: Mutex<Option<UserId>>,
    auth_listeners: Arc<ListenerRegistry<Option<UserId>>>,
    next_id: AtomicU64,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, frame: ClientFrame) -> Result<(), ProtocolError> {
        match lock(&self.outgoing).as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Response { request, result } => match lock(&self.pending).remove(&request) {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                None => log::debug!("Response to request {request} had no waiter"),
            },
            ServerFrame::Snapshot { subscription, result } => {
                let listener = lock(&self.subscriptions).get(&subscription).cloned();
                let Some(listener) = listener else {
                    log::debug!("Snapshot for released subscription {subscription}");
                    return;
                };
                listener.deliver(&result);
                if result.is_err() {
                    lock(&self.subscriptions).remove(&subscription);
                    listener.deactivate();
                }
            }
        }
    }

    /// Tear down after connection loss.
    fn fail_all(&self, reason: &str) {
        *lock(&self.state) = ConnectionState::Disconnected;
        lock(&self.outgoing).take();

        let pending: Vec<PendingReply> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(BackendError::network(reason)));
        }

        let subscriptions: Vec<_> = lock(&self.subscriptions).drain().map(|(_, l)| l).collect();
        if !subscriptions.is_empty() {
            log::warn!("Failing {} live queries: {reason}", subscriptions.len());
        }
        let error: SnapshotResult = Err(BackendError::network(reason));
        for listener in subscriptions {
            listener.deliver(&error);
            listener.deactivate();
        }
    }
}

/// Remote document store and identity service over one WebSocket connection.
pub struct RemoteStore {
    url: String,
    shared: Arc<Shared>,
}

impl RemoteStore {
    /// Connect to a sync server.
    ///
    /// Spawns background tasks for reading and writing WebSocket messages.
    pub async fn connect(url: impl Into<String>) -> Result<Self, ProtocolError> {
        let url = url.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Connecting),
            outgoing: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            user: Mutex::new(None),
            auth_listeners: Arc::new(ListenerRegistry::new()),
            next_id: AtomicU64::new(1),
        });

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
            *lock(&shared.state) = ConnectionState::Disconnected;
            ProtocolError::ConnectFailed(e.to_string())
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing frames to the WebSocket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
        *lock(&shared.outgoing) = Some(out_tx);
        *lock(&shared.state) = ConnectionState::Connected;
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let encoded = match frame.encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        log::error!("Failed to encode request {}: {e}", frame.id);
                        continue;
                    }
                };
                if ws_writer.send(Message::Binary(encoded.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: route responses and snapshots
        let reader_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match ServerFrame::decode(&bytes) {
                            Ok(frame) => reader_shared.dispatch(frame),
                            Err(e) => log::warn!("Dropping undecodable server frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            log::info!("Connection to sync server lost");
            reader_shared.fail_all("Connection to the sync server was lost.");
        });

        log::info!("Connected to sync server at {url}");
        Ok(Self { url, shared })
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.shared.subscriptions).len()
    }

    /// Round-trip a ping.
    pub async fn ping(&self) -> Result<(), BackendError> {
        match self.request(Operation::Ping).await? {
            Reply::Pong => Ok(()),
            _ => Err(ProtocolError::UnexpectedReply("ping").into()),
        }
    }

    /// Close the connection. Pending work fails with `network-request-failed`.
    pub fn disconnect(&self) {
        if lock(&self.shared.outgoing).take().is_some() {
            log::info!("Disconnecting from {}", self.url);
        }
    }

    async fn request(&self, op: Operation) -> Result<Reply, BackendError> {
        let id = self.shared.next_id();
        let name = op.name();
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);

        if let Err(e) = self.shared.send(ClientFrame::new(id, op)) {
            lock(&self.shared.pending).remove(&id);
            return Err(e.into());
        }
        log::debug!("Sent {name} request {id}");

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::ConnectionClosed.into()),
        }
    }

    fn set_user(&self, uid: Option<UserId>) {
        let changed = {
            let mut user = lock(&self.shared.user);
            let changed = *user != uid;
            *user = uid.clone();
            changed
        };
        if changed {
            self.shared.auth_listeners.notify(&uid);
        }
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl DocumentStore for RemoteStore {
    async fn create_document(&self, collection: &str, fields: Fields) -> Result<Document, BackendError> {
        let op = Operation::Create {
            collection: collection.to_string(),
            fields,
        };
        match self.request(op).await? {
            Reply::Document(doc) => Ok(doc),
            _ => Err(ProtocolError::UnexpectedReply("create").into()),
        }
    }

    async fn update_document(&self, collection: &str, id: &DocId, fields: Fields) -> Result<(), BackendError> {
        let op = Operation::Update {
            collection: collection.to_string(),
            id: id.clone(),
            fields,
        };
        self.request(op).await.map(|_| ())
    }

    async fn delete_document(&self, collection: &str, id: &DocId) -> Result<(), BackendError> {
        let op = Operation::Delete {
            collection: collection.to_string(),
            id: id.clone(),
        };
        self.request(op).await.map(|_| ())
    }

    async fn get_document(&self, collection: &str, id: &DocId) -> Result<Option<Document>, BackendError> {
        let op = Operation::Get {
            collection: collection.to_string(),
            id: id.clone(),
        };
        match self.request(op).await? {
            Reply::MaybeDocument(doc) => Ok(doc),
            _ => Err(ProtocolError::UnexpectedReply("get").into()),
        }
    }

    async fn run_query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, BackendError> {
        let op = Operation::Query {
            collection: collection.to_string(),
            query: query.clone(),
        };
        match self.request(op).await? {
            Reply::Documents(docs) => Ok(docs),
            _ => Err(ProtocolError::UnexpectedReply("query").into()),
        }
    }

    fn subscribe(&self, collection: &str, query: Query, listener: SnapshotCallback) -> Subscription {
        let subscription = self.shared.next_id();
        let registered = Arc::new(Listener::new(subscription, listener));
        lock(&self.shared.subscriptions).insert(subscription, registered.clone());

        let frame = ClientFrame::new(
            self.shared.next_id(),
            Operation::Subscribe {
                subscription,
                collection: collection.to_string(),
                query,
            },
        );
        if let Err(e) = self.shared.send(frame) {
            lock(&self.shared.subscriptions).remove(&subscription);
            registered.deliver(&Err(e.into()));
            registered.deactivate();
            return Subscription::inert();
        }

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            registered.deactivate();
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if lock(&shared.subscriptions).remove(&subscription).is_some() {
                let frame = ClientFrame::new(shared.next_id(), Operation::Unsubscribe { subscription });
                // Offline: the server drops the live query with the connection.
                let _ = shared.send(frame);
            }
        })
    }
}

impl IdentityService for RemoteStore {
    async fn sign_in_anonymously(&self) -> Result<UserId, BackendError> {
        match self.request(Operation::SignIn { resume: None }).await? {
            Reply::SignedIn(uid) => {
                self.set_user(Some(uid.clone()));
                Ok(uid)
            }
            _ => Err(ProtocolError::UnexpectedReply("sign-in").into()),
        }
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.request(Operation::SignOut).await?;
        self.set_user(None);
        Ok(())
    }

    fn current_user(&self) -> Option<UserId> {
        lock(&self.shared.user).clone()
    }

    fn on_auth_state_changed(&self, listener: AuthStateCallback) -> Subscription {
        let (registered, subscription) = self.shared.auth_listeners.register(listener);
        registered.deliver(&self.current_user());
        subscription
    }
}
