//! Bounded LRU cache with time-to-live, shared by the session and tracker stores.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug)]
struct Entry<V> {
    value: V,
    touched_at: Instant,
}

/// LRU-bounded key/value map whose entries expire `ttl` after their last write
pub struct TtlCache<V> {
    cache: Arc<Mutex<LruCache<String, Entry<V>>>>,
    ttl: Duration,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            ttl: self.ttl,
        }
    }
}

impl<V> TtlCache<V> {
    /// Create a new cache
    ///
    /// * `capacity` - Maximum number of keys kept; a zero capacity is treated as one
    /// * `ttl` - Time-to-live measured from the last write
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl,
        }
    }

    fn is_live(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.duration_since(entry.touched_at) < self.ttl
    }

    /// Insert or replace a value
    pub async fn put(&self, key: impl Into<String>, value: V) {
        let mut cache = self.cache.lock().await;
        cache.put(
            key.into(),
            Entry {
                value,
                touched_at: Instant::now(),
            },
        );
    }

    /// Remove and return a live value
    pub async fn take(&self, key: &str) -> Option<V> {
        let mut cache = self.cache.lock().await;
        let entry = cache.pop(key)?;
        if self.is_live(&entry, Instant::now()) {
            Some(entry.value)
        } else {
            None
        }
    }

    /// Modify the value under `key` in place, creating it with `init` when
    /// missing or expired. Runs under one lock acquisition.
    pub async fn upsert<I, F>(&self, key: &str, init: I, update: F)
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V),
    {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        let expired = cache.peek(key).map(|e| !self.is_live(e, now)).unwrap_or(false);
        if expired {
            cache.pop(key);
        }

        if let Some(entry) = cache.get_mut(key) {
            update(&mut entry.value);
            entry.touched_at = now;
            return;
        }

        let mut value = init();
        update(&mut value);
        cache.put(
            key.to_string(),
            Entry {
                value,
                touched_at: now,
            },
        );
    }

    /// Prune expired entries
    pub async fn prune_expired(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        let expired_keys: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| !self.is_live(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            cache.pop(key);
        }
        expired_keys.len()
    }

    /// Get current cache size, expired entries included until pruned
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<V: Clone> TtlCache<V> {
    /// Clone out a live value
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();

        let expired = match cache.get(key) {
            Some(entry) if self.is_live(entry, now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        None
    }
}
