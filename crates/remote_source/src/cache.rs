//! Short-lived TTL cache sitting in front of the remote source.
//!
//! Expiry is lazy: entries are only evicted when a lookup touches them.
//! Uses `tokio::time::Instant` so paused-clock tests can advance time.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// A cached value with its creation and expiry instants.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_valid(&self) -> bool {
        Instant::now() <= self.expires_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Key → value cache with per-entry TTL.
#[derive(Debug)]
pub struct CacheStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V: Clone> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Store `value` under `key`, replacing any existing entry.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
    }

    /// The value under `key` if present and unexpired. Expired entries are
    /// evicted.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid() {
                return Some(entry.value.clone());
            }
        }
        // Shard guard from the lookup above is released before removing.
        self.entries.remove_if(key, |_, entry| !entry.is_valid());
        None
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Age of a valid entry.
    pub fn age(&self, key: &str) -> Option<Duration> {
        let age = self
            .entries
            .get(key)
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.age());
        if age.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_valid());
        }
        age
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}
