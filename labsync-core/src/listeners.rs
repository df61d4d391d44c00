//! Observer registry with RAII subscription handles.
//!
//! Notification works on a snapshot of the registered listeners, so a listener
//! may unsubscribe itself (or others) from inside its callback. Removed
//! listeners are deactivated first, which keeps an in-flight snapshot from
//! calling them. A panic inside one callback is logged and does not stop the
//! remaining listeners from being notified.
//!
//! Deliveries to one listener are serialized: a second thread waits for the
//! running callback to return. Only a callback that triggers a delivery to
//! itself on its own thread is skipped.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

pub type Callback<E> = Box<dyn FnMut(&E) + Send>;

/// One registered callback.
pub struct Listener<E> {
    id: u64,
    active: AtomicBool,
    callback: Mutex<Callback<E>>,
    /// Thread currently inside the callback.
    running: Mutex<Option<ThreadId>>,
}

impl<E> Listener<E> {
    pub fn new(id: u64, callback: Callback<E>) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            callback: Mutex::new(callback),
            running: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop all further deliveries to this listener.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Whether the callback is running on the calling thread.
    pub fn is_running_here(&self) -> bool {
        *lock(&self.running) == Some(thread::current().id())
    }

    /// Invoke the callback, waiting for a delivery on another thread to
    /// finish first. Returns `false` if nothing was delivered.
    pub fn deliver(&self, event: &E) -> bool {
        if !self.is_active() {
            return false;
        }
        if self.is_running_here() {
            log::warn!("listener {} is already running, skipping re-entrant delivery", self.id);
            return false;
        }

        let mut callback = lock(&self.callback);
        // Removed while this thread was waiting.
        if !self.is_active() {
            return false;
        }

        *lock(&self.running) = Some(thread::current().id());
        let outcome = catch_unwind(AssertUnwindSafe(|| (*callback)(event)));
        *lock(&self.running) = None;

        match outcome {
            Ok(()) => true,
            Err(_) => {
                log::error!("listener {} panicked during notification", self.id);
                false
            }
        }
    }
}

impl<E> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Ordered set of listeners for one event type.
pub struct ListenerRegistry<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Arc<Listener<E>>>>,
}

impl<E: 'static> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> ListenerRegistry<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback and return its listener.
    pub fn add(&self, callback: impl FnMut(&E) + Send + 'static) -> Arc<Listener<E>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(Listener::new(id, Box::new(callback)));
        lock(&self.listeners).push(listener.clone());
        listener
    }

    /// Remove and deactivate a listener. Returns whether it was registered.
    pub fn remove(&self, id: u64) -> bool {
        let mut listeners = lock(&self.listeners);
        match listeners.iter().position(|l| l.id() == id) {
            Some(index) => {
                let listener = listeners.remove(index);
                listener.deactivate();
                true
            }
            None => false,
        }
    }

    /// Register a callback and return the listener with a handle that removes it.
    pub fn register(
        self: &Arc<Self>,
        callback: impl FnMut(&E) + Send + 'static,
    ) -> (Arc<Listener<E>>, Subscription) {
        let listener = self.add(callback);
        let registry: Weak<Self> = Arc::downgrade(self);
        let id = listener.id();
        let weak_listener = Arc::downgrade(&listener);
        let subscription = Subscription::new(move || {
            if let Some(listener) = weak_listener.upgrade() {
                listener.deactivate();
            }
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });
        (listener, subscription)
    }

    pub fn subscribe(self: &Arc<Self>, callback: impl FnMut(&E) + Send + 'static) -> Subscription {
        self.register(callback).1
    }

    pub fn snapshot(&self) -> Vec<Arc<Listener<E>>> {
        lock(&self.listeners).clone()
    }

    /// Notify every listener registered at call time. Returns the delivery count.
    pub fn notify(&self, event: &E) -> usize {
        self.snapshot()
            .iter()
            .filter(|listener| listener.deliver(event))
            .count()
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deactivate and drop every listener.
    pub fn clear(&self) {
        for listener in lock(&self.listeners).drain(..) {
            listener.deactivate();
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for a live registration.
///
/// `unsubscribe` is idempotent; dropping the handle unsubscribes.
#[must_use = "dropping a Subscription immediately cancels it"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle with nothing to release.
    pub fn inert() -> Self {
        Self { release: None }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
