use crate::error::FetchError;
use crate::request::Response;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A partial state update broadcast to the subscribers of a key.
///
/// `None` fields are untouched by the patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub is_fetching: Option<bool>,
    pub data: Option<Response>,
    pub error: Option<FetchError>,
}

impl StatePatch {
    pub fn fetching() -> Self {
        Self {
            is_fetching: Some(true),
            ..Self::default()
        }
    }

    /// Fetching stopped without a new outcome (e.g. cancellation).
    pub fn idle() -> Self {
        Self {
            is_fetching: Some(false),
            ..Self::default()
        }
    }

    pub fn succeeded(data: Response) -> Self {
        Self {
            is_fetching: Some(false),
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: FetchError) -> Self {
        Self {
            is_fetching: Some(false),
            data: None,
            error: Some(error),
        }
    }

    /// A local mutation of the cached data; fetching state is unchanged.
    pub fn mutated(data: Response) -> Self {
        Self {
            is_fetching: None,
            data: Some(data),
            error: None,
        }
    }
}

type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct HubInner<P> {
    listeners: Mutex<HashMap<String, Vec<(u64, Listener<P>)>>>,
    next_id: AtomicU64,
}

trait Detach: Send + Sync {
    fn detach(&self, key: &str, id: u64);
}

impl<P: 'static> Detach for HubInner<P> {
    fn detach(&self, key: &str, id: u64) {
        let mut listeners = self.listeners.lock();
        if let Some(set) = listeners.get_mut(key) {
            set.retain(|(existing, _)| *existing != id);
            if set.is_empty() {
                listeners.remove(key);
            }
        }
    }
}

/// Maps a request key to the callbacks observing it.
///
/// Notification is synchronous: `notify` returns after every subscriber
/// registered at the time of the call has seen the patch. The subscriber set
/// is snapshotted first, so callbacks may subscribe or unsubscribe freely
/// without affecting the pass in progress.
pub struct SubscriptionHub<P> {
    inner: Arc<HubInner<P>>,
}

impl<P> Clone for SubscriptionHub<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Send + Sync + 'static> Default for SubscriptionHub<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Send + Sync + 'static> SubscriptionHub<P> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers `callback` for `key`. The subscription lives as long as the
    /// returned handle.
    pub fn subscribe<F>(&self, key: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        let inner: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            hub: Arc::downgrade(&inner),
            key,
            id,
        }
    }

    /// Delivers `patch` to every current subscriber of `key` and returns how
    /// many were invoked.
    pub fn notify(&self, key: &str, patch: &P) -> usize {
        let snapshot: Vec<Listener<P>> = match self.inner.listeners.lock().get(key) {
            Some(set) => set.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        for callback in &snapshot {
            callback(patch);
        }
        snapshot.len()
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.listeners.lock().get(key).map_or(0, Vec::len)
    }
}

/// Keeps a hub callback registered; dropping it unsubscribes.
pub struct Subscription {
    hub: Weak<dyn Detach>,
    key: String,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(&self.key, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}
