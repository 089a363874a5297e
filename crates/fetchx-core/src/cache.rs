use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub stored_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    /// A zero ttl is never fresh.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        !ttl.is_zero() && self.age() <= ttl
    }
}

/// Response cache keyed by request key.
///
/// Entries never expire on their own: staleness is evaluated against the
/// caller's ttl on every read, so one entry can be fresh for a request with a
/// long `cache_time` and stale for another with a short one.
pub struct CacheStore<V> {
    entries: Arc<Mutex<HashMap<String, CacheEntry<V>>>>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V> Default for CacheStore<V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<V: Clone> CacheStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.lock().get(key).cloned()
    }

    /// Overwrites unconditionally; never triggers a fetch.
    pub fn set(&self, key: impl Into<String>, data: V) {
        let entry = CacheEntry {
            data,
            stored_at: Instant::now(),
        };
        self.entries.lock().insert(key.into(), entry);
    }

    /// Returns `true` if an entry was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn is_fresh(&self, key: &str, ttl: Duration) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(false, |entry| entry.is_fresh(ttl))
    }

    /// The cached data if it is still fresh under `ttl`.
    pub fn get_fresh(&self, key: &str, ttl: Duration) -> Option<V> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        entry.is_fresh(ttl).then(|| entry.data.clone())
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
