//! Identity provider adapter.
//!
//! Wraps an [`IdentityService`] and publishes the resolved identity through a
//! shared [`Session`] and a listener registry. Listeners see every distinct
//! state exactly once: a session reset is delivered as two notifications,
//! first `None` and then the new identity.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::backend::IdentityService;
use crate::error::LabError;
use crate::listeners::{lock, ListenerRegistry, Subscription};
use crate::model::Identity;

#[derive(Debug, Default)]
struct SessionState {
    identity: Option<Identity>,
    ready: bool,
}

/// Read side of the current identity, shared with the services that need to
/// stamp writes.
#[derive(Debug, Clone, Default)]
pub struct Session {
    inner: Arc<RwLock<SessionState>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Identity> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identity
            .clone()
    }

    /// Whether the provider has produced an identity at least once.
    pub fn is_ready(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).ready
    }

    /// The current identity, or [`LabError::Auth`] when there is none.
    pub fn require(&self) -> Result<Identity, LabError> {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        match (&state.identity, state.ready) {
            (Some(identity), true) => Ok(identity.clone()),
            _ => Err(LabError::Auth),
        }
    }

    /// Install `identity`. Returns `false` when it equals the current one.
    pub(crate) fn replace(&self, identity: Option<Identity>) -> bool {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if state.identity == identity {
            return false;
        }
        if identity.is_some() {
            state.ready = true;
        }
        state.identity = identity;
        true
    }
}

/// Retry schedule for the initial sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed pause between attempts.
    pub delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Short, bounded schedule for tests.
    pub fn for_testing() -> Self {
        Self {
            delay: Duration::from_millis(10),
            max_attempts: Some(3),
        }
    }

    pub fn no_retry() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: Some(1),
        }
    }
}

/// Adapter over the anonymous identity provider.
pub struct AuthAdapter<P: IdentityService + 'static> {
    provider: Arc<P>,
    session: Session,
    listeners: Arc<ListenerRegistry<Option<Identity>>>,
    /// Held while an identity change is published or a listener is attached,
    /// so a new listener never sees a state out of order.
    publishing: Arc<Mutex<()>>,
    provider_subscription: Mutex<Option<Subscription>>,
    retry: RetryPolicy,
}

impl<P: IdentityService + 'static> AuthAdapter<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self::with_retry(provider, RetryPolicy::default())
    }

    pub fn with_retry(provider: Arc<P>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            session: Session::new(),
            listeners: Arc::new(ListenerRegistry::new()),
            publishing: Arc::new(Mutex::new(())),
            provider_subscription: Mutex::new(None),
            retry,
        }
    }

    /// Establish or resume an anonymous identity with a single attempt.
    pub async fn initialize(&self) -> Result<Identity, LabError> {
        self.attach();

        if let Some(uid) = self.provider.current_user() {
            let identity = Identity::new(uid);
            log::info!("Resuming anonymous session {}", identity.display_id());
            self.publish(Some(identity.clone()));
            return Ok(identity);
        }

        log::info!("No current identity, signing in anonymously");
        let uid = self
            .provider
            .sign_in_anonymously()
            .await
            .map_err(LabError::Identity)?;
        let identity = Identity::new(uid);
        log::info!("Signed in as {}", identity.display_id());
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    /// [`Self::initialize`] repeated on failure according to the retry policy.
    pub async fn initialize_with_retry(&self) -> Result<Identity, LabError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.initialize().await {
                Ok(identity) => return Ok(identity),
                Err(err) => {
                    if self.retry.max_attempts.is_some_and(|max| attempt >= max) {
                        log::error!("Anonymous sign-in failed after {attempt} attempts: {err}");
                        return Err(err);
                    }
                    log::warn!(
                        "Anonymous sign-in attempt {attempt} failed: {err}; retrying in {:?}",
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }

    /// Register an identity listener.
    ///
    /// Called immediately with the current identity when one is known, then
    /// on every change until the handle is released.
    pub fn subscribe(&self, callback: impl FnMut(&Option<Identity>) + Send + 'static) -> Subscription {
        let _publishing = lock(&self.publishing);
        let (listener, subscription) = self.listeners.register(callback);
        if let Some(identity) = self.session.current() {
            listener.deliver(&Some(identity));
        }
        subscription
    }

    /// End the current identity and sign in again under a new one.
    pub async fn reset_session(&self) -> Result<Identity, LabError> {
        log::info!("Resetting anonymous session");
        self.provider.sign_out().await.map_err(LabError::Identity)?;
        self.publish(None);

        let uid = self
            .provider
            .sign_in_anonymously()
            .await
            .map_err(LabError::Identity)?;
        let identity = Identity::new(uid);
        log::info!("New anonymous session {}", identity.display_id());
        self.publish(Some(identity.clone()));
        Ok(identity)
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.session.current()
    }

    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    pub fn display_id(&self) -> Option<String> {
        self.session.current().map(|identity| identity.display_id())
    }

    /// Shared read handle for services that stamp writes.
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn publish(&self, identity: Option<Identity>) {
        publish(&self.publishing, &self.session, &self.listeners, identity);
    }

    /// Forward provider-side session changes (e.g. expiry) into our listeners.
    fn attach(&self) {
        let mut slot = lock(&self.provider_subscription);
        if slot.is_some() {
            return;
        }
        let session = self.session.clone();
        let listeners = self.listeners.clone();
        let publishing = self.publishing.clone();
        let subscription = self.provider.on_auth_state_changed(Box::new(move |uid| {
            let identity = uid.clone().map(Identity::new);
            // Before the first identity, the provider's initial `None` carries no news.
            if identity.is_none() && !session.is_ready() {
                return;
            }
            publish(&publishing, &session, &listeners, identity);
        }));
        *slot = Some(subscription);
    }
}

fn publish(
    publishing: &Mutex<()>,
    session: &Session,
    listeners: &ListenerRegistry<Option<Identity>>,
    identity: Option<Identity>,
) {
    let _publishing = lock(publishing);
    if session.replace(identity.clone()) {
        log::debug!(
            "Identity changed: {}",
            identity.as_ref().map_or("none".to_string(), |i| i.display_id())
        );
        listeners.notify(&identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AuthStateCallback;
    use crate::error::{BackendError, ErrorCode};
    use crate::model::UserId;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Provider that fails the first `failures` sign-ins.
    struct FlakyProvider {
        failures: AtomicU32,
        attempts: AtomicU32,
        current: Mutex<Option<UserId>>,
        listeners: Arc<ListenerRegistry<Option<UserId>>>,
    }

    impl FlakyProvider {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
                current: Mutex::new(None),
                listeners: Arc::new(ListenerRegistry::new()),
            })
        }

        fn set(&self, uid: Option<UserId>) {
            *lock(&self.current) = uid.clone();
            self.listeners.notify(&uid);
        }
    }

    impl IdentityService for FlakyProvider {
        async fn sign_in_anonymously(&self) -> Result<UserId, BackendError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(BackendError::network("provider unreachable"));
            }
            let uid = UserId::generate();
            self.set(Some(uid.clone()));
            Ok(uid)
        }

        async fn sign_out(&self) -> Result<(), BackendError> {
            self.set(None);
            Ok(())
        }

        fn current_user(&self) -> Option<UserId> {
            lock(&self.current).clone()
        }

        fn on_auth_state_changed(&self, mut listener: AuthStateCallback) -> Subscription {
            let current = self.current_user();
            listener(&current);
            self.listeners.subscribe(listener)
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Option<Identity>>>>, impl FnMut(&Option<Identity>) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |identity: &Option<Identity>| lock(&sink).push(identity.clone()))
    }

    #[tokio::test]
    async fn test_initialize_signs_in() {
        let provider = FlakyProvider::new(0);
        let adapter = AuthAdapter::with_retry(provider.clone(), RetryPolicy::no_retry());
        assert!(!adapter.is_ready());
        assert!(adapter.current_identity().is_none());

        let identity = adapter.initialize().await.unwrap();
        assert!(adapter.is_ready());
        assert_eq!(adapter.current_identity(), Some(identity.clone()));
        assert_eq!(provider.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.session().require().unwrap(), identity);
    }

    #[tokio::test]
    async fn test_initialize_resumes_existing_identity() {
        let provider = FlakyProvider::new(0);
        let existing = UserId::new("existing-user-123");
        *lock(&provider.current) = Some(existing.clone());

        let adapter = AuthAdapter::new(provider.clone());
        let identity = adapter.initialize().await.unwrap();
        assert_eq!(identity.uid, existing);
        assert_eq!(provider.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initialize_failure_is_identity_error() {
        let provider = FlakyProvider::new(1);
        let adapter = AuthAdapter::with_retry(provider, RetryPolicy::no_retry());
        let err = adapter.initialize_with_retry().await.unwrap_err();
        assert!(matches!(err, LabError::Identity(ref e) if e.code == ErrorCode::NetworkRequestFailed));
        assert!(!adapter.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_fixed_delay() {
        let provider = FlakyProvider::new(2);
        let adapter = AuthAdapter::new(provider.clone());

        let started = tokio::time::Instant::now();
        adapter.initialize_with_retry().await.unwrap();
        assert_eq!(provider.attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_attempts() {
        let provider = FlakyProvider::new(10);
        let adapter = AuthAdapter::with_retry(provider.clone(), RetryPolicy::for_testing());
        assert!(adapter.initialize_with_retry().await.is_err());
        assert_eq!(provider.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_immediately() {
        let adapter = AuthAdapter::new(FlakyProvider::new(0));
        let identity = adapter.initialize().await.unwrap();

        let (seen, cb) = recorder();
        let _sub = adapter.subscribe(cb);
        assert_eq!(*lock(&seen), vec![Some(identity)]);
    }

    #[tokio::test]
    async fn test_subscribe_before_identity_waits() {
        let adapter = AuthAdapter::new(FlakyProvider::new(0));
        let (seen, cb) = recorder();
        let _sub = adapter.subscribe(cb);
        assert!(lock(&seen).is_empty());

        let identity = adapter.initialize().await.unwrap();
        assert_eq!(*lock(&seen), vec![Some(identity)]);
    }

    #[test]
    fn test_subscribe_racing_publish_sees_each_state_once() {
        let adapter = AuthAdapter::new(FlakyProvider::new(0));
        let identities: Vec<Identity> = (0..4)
            .map(|n| Identity::new(UserId::new(format!("user-{n}"))))
            .collect();
        let mut recorders = Vec::new();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..200 {
                    adapter.publish(Some(identities[round % identities.len()].clone()));
                }
            });
            for _ in 0..50 {
                let (seen, cb) = recorder();
                recorders.push((seen, adapter.subscribe(cb)));
                std::thread::yield_now();
            }
        });

        let last = adapter.current_identity();
        for (seen, _sub) in &recorders {
            let seen = lock(seen);
            assert!(seen.windows(2).all(|pair| pair[0] != pair[1]), "{seen:?}");
            assert_eq!(seen.last(), Some(&last));
        }
    }

    #[tokio::test]
    async fn test_reset_session_notifies_none_then_new() {
        let adapter = AuthAdapter::new(FlakyProvider::new(0));
        let first = adapter.initialize().await.unwrap();

        let (seen, cb) = recorder();
        let _sub = adapter.subscribe(cb);
        let second = adapter.reset_session().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(*lock(&seen), vec![Some(first), None, Some(second.clone())]);
        assert_eq!(adapter.current_identity(), Some(second));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let adapter = AuthAdapter::new(FlakyProvider::new(0));
        adapter.initialize().await.unwrap();

        let (seen, cb) = recorder();
        let mut sub = adapter.subscribe(cb);
        sub.unsubscribe();
        sub.unsubscribe();
        adapter.reset_session().await.unwrap();

        assert_eq!(lock(&seen).len(), 1);
        assert_eq!(adapter.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_side_sign_out_is_forwarded() {
        let provider = FlakyProvider::new(0);
        let adapter = AuthAdapter::new(provider.clone());
        adapter.initialize().await.unwrap();

        let (seen, cb) = recorder();
        let _sub = adapter.subscribe(cb);
        provider.set(None);

        assert_eq!(lock(&seen).last(), Some(&None));
        assert!(adapter.session().require().is_err());
        assert!(adapter.is_ready());
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let adapter = AuthAdapter::new(FlakyProvider::new(0));
        let _bad = adapter.subscribe(|_| panic!("broken listener"));
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let _good = adapter.subscribe(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        adapter.initialize().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
