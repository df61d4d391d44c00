//! Application controller — owns the view state and wires the identity
//! adapter to the record feed.
//!
//! ```text
//!  AuthAdapter ── identity changed ──► controller ── subscribe ──► LabService
//!                                          ▲                           │
//!                                          └──── record snapshots ─────┘
//! ```
//!
//! Exactly one record feed is live at a time: on every identity change the
//! previous feed is released before a new one is installed. The view lock
//! is never held across an await, since store callbacks may fire from inside
//! a write.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use labsync_core::listeners::lock;
use labsync_core::{
    AuthAdapter, DocId, DocumentStore, Identity, IdentityService, LabError, LabForm, LabPatch, LabRecord,
    LabService, LabStats, RetryPolicy, Subscription,
};

use crate::banner::{Banner, BannerKind, BannerSlot, DEFAULT_TIMEOUT};

pub const MSG_CREATED: &str = "Laboratório criado com sucesso!";
pub const MSG_UPDATED: &str = "Laboratório atualizado com sucesso!";
pub const MSG_DELETED: &str = "Laboratório excluído com sucesso!";
pub const MSG_SAMPLE_ADDED: &str = "Laboratório de exemplo adicionado!";
pub const MSG_SESSION_RESET: &str = "Nova sessão anônima iniciada";
pub const MSG_SYNC_FAILED: &str = "Erro na sincronização";
pub const MSG_CONNECT_FAILED: &str = "Erro ao conectar com o servidor";
pub const MSG_NOT_AUTHENTICATED: &str = "Usuário não autenticado";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first identity.
    Loading,
    Unauthenticated,
    /// Signed in with a live record feed.
    Ready,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub banner_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            banner_timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn for_testing() -> Self {
        Self {
            banner_timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::for_testing(),
        }
    }
}

struct View {
    phase: Phase,
    identity: Option<Identity>,
    records: Vec<LabRecord>,
    banner: BannerSlot,
}

pub struct AppController<S: DocumentStore + 'static, P: IdentityService + 'static> {
    service: Arc<LabService<S>>,
    auth: AuthAdapter<P>,
    view: Arc<Mutex<View>>,
    feed: Arc<Mutex<Option<Subscription>>>,
    identity_subscription: Mutex<Option<Subscription>>,
}

impl<S: DocumentStore + 'static, P: IdentityService + 'static> AppController<S, P> {
    pub fn new(store: Arc<S>, provider: Arc<P>, config: ControllerConfig) -> Self {
        let auth = AuthAdapter::with_retry(provider, config.retry);
        let service = Arc::new(LabService::new(store, auth.session()));
        Self {
            service,
            auth,
            view: Arc::new(Mutex::new(View {
                phase: Phase::Loading,
                identity: None,
                records: Vec::new(),
                banner: BannerSlot::new(config.banner_timeout),
            })),
            feed: Arc::new(Mutex::new(None)),
            identity_subscription: Mutex::new(None),
        }
    }

    /// Attach the identity listener and sign in.
    ///
    /// On success the controller is `Ready` with a live feed. On failure it
    /// is `Unauthenticated` with an error banner; no further retry happens
    /// beyond the adapter's retry policy.
    pub async fn start(&self) -> Result<Identity, LabError> {
        self.attach_identity_listener();

        match self.auth.initialize_with_retry().await {
            Ok(identity) => {
                log::info!("Application ready as {}", identity.display_id());
                Ok(identity)
            }
            Err(err) => {
                log::error!("Failed to start application: {err}");
                let mut view = lock(&self.view);
                view.phase = Phase::Unauthenticated;
                view.banner.show(BannerKind::Danger, MSG_CONNECT_FAILED);
                Err(err)
            }
        }
    }

    /// Validate the form and create a laboratory from it.
    pub async fn add_lab(&self, form: &LabForm) -> Result<LabRecord, LabError> {
        if self.auth.current_identity().is_none() {
            self.show(BannerKind::Danger, MSG_NOT_AUTHENTICATED);
            return Err(LabError::Auth);
        }

        let draft = match form.validate() {
            Ok(draft) => draft,
            Err(err) => {
                self.show(BannerKind::Warning, err.to_string());
                return Err(err.into());
            }
        };

        let result = self.service.create(draft).await;
        self.report(result, BannerKind::Success, MSG_CREATED)
    }

    pub async fn add_sample(&self) -> Result<LabRecord, LabError> {
        let draft = self.service.generate_sample_record();
        let result = self.service.create(draft).await;
        self.report(result, BannerKind::Info, MSG_SAMPLE_ADDED)
    }

    pub async fn update_lab(&self, id: &DocId, patch: LabPatch) -> Result<(), LabError> {
        let result = self.service.update(id, patch).await;
        self.report(result, BannerKind::Success, MSG_UPDATED)
    }

    pub async fn delete_lab(&self, id: &DocId) -> Result<(), LabError> {
        let result = self.service.delete(id).await;
        self.report(result, BannerKind::Success, MSG_DELETED)
    }

    /// Replace the anonymous identity. The feed restarts under the new one.
    pub async fn reset_session(&self) -> Result<Identity, LabError> {
        let result = self.auth.reset_session().await;
        self.report(result, BannerKind::Info, MSG_SESSION_RESET)
    }

    pub fn dismiss_banner(&self) -> bool {
        lock(&self.view).banner.dismiss()
    }

    /// Expire a timed-out banner. Returns `true` if the view changed.
    pub fn tick(&self) -> bool {
        lock(&self.view).banner.expire(Instant::now())
    }

    pub fn phase(&self) -> Phase {
        lock(&self.view).phase
    }

    pub fn identity(&self) -> Option<Identity> {
        lock(&self.view).identity.clone()
    }

    /// Header text for the current session.
    pub fn user_label(&self) -> String {
        match self.auth.display_id() {
            Some(id) => format!("Usuário: {id}"),
            None => "Não autenticado".to_string(),
        }
    }

    /// Latest snapshot, newest first.
    pub fn records(&self) -> Vec<LabRecord> {
        lock(&self.view).records.clone()
    }

    pub fn stats(&self) -> LabStats {
        LabStats::from_records(&lock(&self.view).records)
    }

    pub fn banner(&self) -> Option<Banner> {
        lock(&self.view).banner.visible(Instant::now()).cloned()
    }

    pub fn has_live_feed(&self) -> bool {
        lock(&self.feed).is_some()
    }

    pub fn service(&self) -> &LabService<S> {
        &self.service
    }

    pub fn auth(&self) -> &AuthAdapter<P> {
        &self.auth
    }

    /// Release the identity listener and the record feed.
    pub fn shutdown(&self) {
        let identity = lock(&self.identity_subscription).take();
        let feed = lock(&self.feed).take();
        if identity.is_some() || feed.is_some() {
            log::info!("Controller shut down");
        }
        drop(identity);
        drop(feed);
    }

    fn attach_identity_listener(&self) {
        let mut slot = lock(&self.identity_subscription);
        if slot.is_some() {
            return;
        }
        let service = self.service.clone();
        let view = self.view.clone();
        let feed = self.feed.clone();
        *slot = Some(self.auth.subscribe(move |identity| {
            on_identity_changed(&service, &view, &feed, identity);
        }));
    }

    fn show(&self, kind: BannerKind, text: impl Into<String>) {
        lock(&self.view).banner.show(kind, text);
    }

    fn report<T>(&self, result: Result<T, LabError>, kind: BannerKind, success: &str) -> Result<T, LabError> {
        match &result {
            Ok(_) => self.show(kind, success),
            Err(LabError::Auth) => self.show(BannerKind::Danger, MSG_NOT_AUTHENTICATED),
            Err(LabError::Validation(err)) => self.show(BannerKind::Warning, err.to_string()),
            Err(err) => self.show(BannerKind::Danger, format!("Erro: {err}")),
        }
        result
    }
}

impl<S: DocumentStore + 'static, P: IdentityService + 'static> Drop for AppController<S, P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn on_identity_changed<S: DocumentStore + 'static>(
    service: &Arc<LabService<S>>,
    view: &Arc<Mutex<View>>,
    feed: &Mutex<Option<Subscription>>,
    identity: &Option<Identity>,
) {
    let mut feed = lock(feed);
    if let Some(mut previous) = feed.take() {
        previous.unsubscribe();
        log::debug!("Previous record feed released");
    }

    {
        let mut view = lock(view);
        view.identity = identity.clone();
        match identity {
            Some(_) => view.phase = Phase::Ready,
            None => {
                view.phase = Phase::Unauthenticated;
                view.records.clear();
            }
        }
    }

    if let Some(identity) = identity {
        log::info!("Starting record feed for {}", identity.display_id());
        *feed = Some(start_feed(service, view.clone()));
    }
}

fn start_feed<S: DocumentStore + 'static>(service: &LabService<S>, view: Arc<Mutex<View>>) -> Subscription {
    service.subscribe(move |snapshot| {
        let mut view = lock(&view);
        match snapshot {
            Ok(records) => {
                log::debug!("Synchronized {} laboratories", records.len());
                view.records = records;
            }
            Err(err) => {
                log::error!("Record feed failed: {err}");
                view.banner.show(BannerKind::Danger, MSG_SYNC_FAILED);
            }
        }
    })
}
