//! In-process anonymous identity issuer.

use std::sync::{Arc, Mutex};

use labsync_core::listeners::lock;
use labsync_core::{AuthStateCallback, BackendError, IdentityService, ListenerRegistry, Subscription, UserId};

/// Issues random anonymous identifiers and reports session changes.
pub struct AnonymousAuth {
    current: Mutex<Option<UserId>>,
    listeners: Arc<ListenerRegistry<Option<UserId>>>,
}

impl Default for AnonymousAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl AnonymousAuth {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    /// Start with an existing session, as if restored from a previous run.
    pub fn resume(uid: UserId) -> Self {
        Self {
            current: Mutex::new(Some(uid)),
            listeners: Arc::new(ListenerRegistry::new()),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Sign in synchronously. Keeps the current identity if there is one.
    pub fn sign_in(&self) -> UserId {
        let uid = {
            let mut current = lock(&self.current);
            if let Some(uid) = current.as_ref() {
                return uid.clone();
            }
            let uid = UserId::generate();
            *current = Some(uid.clone());
            uid
        };
        log::info!("Issued anonymous identity {uid}");
        self.listeners.notify(&Some(uid.clone()));
        uid
    }

    pub fn end_session(&self) {
        let previous = lock(&self.current).take();
        if let Some(uid) = previous {
            log::info!("Ended anonymous session {uid}");
            self.listeners.notify(&None);
        }
    }
}

impl IdentityService for AnonymousAuth {
    async fn sign_in_anonymously(&self) -> Result<UserId, BackendError> {
        Ok(self.sign_in())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.end_session();
        Ok(())
    }

    fn current_user(&self) -> Option<UserId> {
        lock(&self.current).clone()
    }

    fn on_auth_state_changed(&self, listener: AuthStateCallback) -> Subscription {
        let (registered, subscription) = self.listeners.register(listener);
        registered.deliver(&self.current_user());
        subscription
    }
}
