use crate::config::FetchConfig;
use crate::hub::{StatePatch, SubscriptionHub};
use crate::FetchOutcome;
use futures::future::{AbortHandle, BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The outcome future every deduplicated caller awaits.
pub type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Bookkeeping for one outstanding request.
pub struct InFlightItem {
    /// Aborts the underlying execution.
    pub cancel_handle: Option<AbortHandle>,
    /// Per-attempt timeout racing the transport call.
    pub timeout: Option<Duration>,
    pub started_at: Instant,
    pub cancellable: bool,
    pub shared: Option<SharedFetch>,
    generation: u64,
    holders: usize,
}

impl InFlightItem {
    pub fn new() -> Self {
        Self {
            cancel_handle: None,
            timeout: None,
            started_at: Instant::now(),
            cancellable: false,
            shared: None,
            generation: 0,
            holders: 1,
        }
    }

    pub fn with_cancel_handle(mut self, handle: AbortHandle) -> Self {
        self.cancel_handle = Some(handle);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn started_within(&self, window: Option<Duration>) -> bool {
        window.map_or(true, |window| self.started_at.elapsed() <= window)
    }

    fn abort(&self) {
        if let Some(handle) = &self.cancel_handle {
            handle.abort();
        }
    }
}

impl Default for InFlightItem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InFlightItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightItem")
            .field("generation", &self.generation)
            .field("holders", &self.holders)
            .field("started_at", &self.started_at)
            .field("timeout", &self.timeout)
            .field("cancellable", &self.cancellable)
            .field("shared", &self.shared.is_some())
            .finish()
    }
}

/// How a new request treats an execution already in flight for its key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupePolicy {
    pub enabled: bool,
    /// Only attach to executions younger than this (None = any age).
    pub window: Option<Duration>,
    /// Abort the in-flight execution and start over instead of attaching.
    pub cancellable: bool,
}

impl From<&FetchConfig> for DedupePolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            enabled: config.dedupe,
            window: config.dedupe_window(),
            cancellable: config.cancellable,
        }
    }
}

pub enum Admission {
    /// Attached to an execution already in flight.
    Joined(SharedFetch),
    /// A new execution was registered. The handle must be handed to it; the
    /// key stays in flight until the handle is dropped.
    Started {
        shared: SharedFetch,
        handle: InFlightHandle,
    },
}

/// Tracks which keys have an outstanding request.
///
/// Every record carries a generation so that a handle belonging to a
/// superseded or cancelled execution can never end its successor's record.
#[derive(Clone)]
pub struct InFlightRegistry {
    items: Arc<Mutex<HashMap<String, InFlightItem>>>,
    hub: SubscriptionHub<StatePatch>,
    generations: Arc<AtomicU64>,
}

impl InFlightRegistry {
    pub fn new(hub: SubscriptionHub<StatePatch>) -> Self {
        Self {
            items: Arc::new(Mutex::new(HashMap::new())),
            hub,
            generations: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    /// Marks `key` in flight and notifies "fetching started".
    ///
    /// A second `begin` while the key is already in flight shares the
    /// existing record; the key is released once every handle is dropped.
    pub fn begin(&self, key: &str) -> InFlightHandle {
        let (generation, started) = {
            let mut items = self.items.lock();
            match items.get_mut(key) {
                Some(item) => {
                    item.holders += 1;
                    (item.generation, false)
                }
                None => {
                    let mut item = InFlightItem::new();
                    item.generation = self.next_generation();
                    let generation = item.generation;
                    items.insert(key.to_string(), item);
                    (generation, true)
                }
            }
        };

        if started {
            self.hub.notify(key, &StatePatch::fetching());
        }
        self.handle(key, generation)
    }

    /// Atomically attaches to the in-flight execution for `key` or registers
    /// a new one built by `launch`.
    ///
    /// `launch` runs under the registry lock and receives the generation of
    /// the new record. It must only create the execution (spawn, build the
    /// shared future); it must not call back into the registry.
    pub fn join_or_begin<F>(&self, key: &str, policy: DedupePolicy, launch: F) -> Admission
    where
        F: FnOnce(u64) -> (InFlightItem, SharedFetch),
    {
        let superseded;
        let (shared, generation) = {
            let mut items = self.items.lock();
            let existing = items
                .get(key)
                .map(|item| (item.started_within(policy.window), item.shared.clone()));

            superseded = match existing {
                Some(_) if policy.cancellable => items.remove(key),
                Some((true, Some(shared))) if policy.enabled => {
                    tracing::debug!("InFlightRegistry: {} attached to in-flight request", key);
                    return Admission::Joined(shared);
                }
                _ => None,
            };

            let generation = self.next_generation();
            let (mut item, shared) = launch(generation);
            item.generation = generation;
            item.holders = 1;
            item.shared = Some(shared.clone());
            items.insert(key.to_string(), item);
            (shared, generation)
        };

        if let Some(previous) = superseded {
            tracing::debug!("InFlightRegistry: {} superseded generation {}", key, previous.generation);
            previous.abort();
        }

        self.hub.notify(key, &StatePatch::fetching());
        Admission::Started {
            shared,
            handle: self.handle(key, generation),
        }
    }

    /// Forgets `key` regardless of outstanding handles.
    pub fn end(&self, key: &str) -> bool {
        self.items.lock().remove(key).is_some()
    }

    /// Removes `key` and aborts its execution. Returns the generation that
    /// was cancelled.
    pub fn cancel(&self, key: &str) -> Option<u64> {
        let item = self.items.lock().remove(key)?;
        item.abort();
        tracing::debug!("InFlightRegistry: cancelled {} (generation {})", key, item.generation);
        Some(item.generation)
    }

    /// Cancels every in-flight execution; returns `(key, generation)` pairs.
    pub fn cancel_all(&self) -> Vec<(String, u64)> {
        let drained: Vec<(String, InFlightItem)> = self.items.lock().drain().collect();
        drained
            .into_iter()
            .map(|(key, item)| {
                item.abort();
                (key, item.generation)
            })
            .collect()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.items.lock().contains_key(key)
    }

    pub fn started_at(&self, key: &str) -> Option<Instant> {
        self.items.lock().get(key).map(|item| item.started_at)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Runs `f` with `key` marked in flight, releasing it however `f` ends.
    /// An empty key runs `f` untracked.
    pub async fn with_in_flight<F, Fut, R>(&self, key: &str, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        if key.is_empty() {
            return f().await;
        }
        let _handle = self.begin(key);
        f().await
    }

    fn handle(&self, key: &str, generation: u64) -> InFlightHandle {
        InFlightHandle {
            registry: self.clone(),
            key: key.to_string(),
            generation,
        }
    }

    fn release(&self, key: &str, generation: u64) {
        let mut items = self.items.lock();
        if let Some(item) = items.get_mut(key) {
            if item.generation != generation {
                return;
            }
            item.holders = item.holders.saturating_sub(1);
            if item.holders == 0 {
                items.remove(key);
            }
        }
    }

    fn is_live(&self, key: &str, generation: u64) -> bool {
        self.items
            .lock()
            .get(key)
            .map_or(false, |item| item.generation == generation)
    }
}

/// Keeps a key in flight; dropping it releases the key, including when the
/// owning future panics or is aborted.
pub struct InFlightHandle {
    registry: InFlightRegistry,
    key: String,
    generation: u64,
}

impl InFlightHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `false` once the record was cancelled or superseded.
    pub fn is_live(&self) -> bool {
        self.registry.is_live(&self.key, self.generation)
    }
}

impl Drop for InFlightHandle {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.generation);
    }
}

impl fmt::Debug for InFlightHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightHandle")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}
