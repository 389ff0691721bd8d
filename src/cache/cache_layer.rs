//! TTL cache store
//!
//! Bounded key/value store with per-entry expiry. When a new key arrives
//! at capacity, the earliest-inserted surviving entry is evicted. Reads do
//! not refresh an entry's position, so this is FIFO-on-overflow rather than
//! LRU. Overwriting an existing key keeps its original position.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{PerfError, PerfResult};
use crate::monitoring::metrics::CACHE_EVICTIONS_TOTAL;

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub item_count: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache entry with creation time for TTL checking
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub hit_count: u64,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
            hit_count: 0,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

struct Inner<V> {
    entries: IndexMap<String, CacheEntry<V>>,
    stats: CacheStats,
}

/// Thread-safe TTL cache with insertion-order eviction.
///
/// The capacity check and the insert run under one lock, so the size
/// bound holds with any number of writer threads.
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    max_size: usize,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> PerfResult<Self> {
        if max_size == 0 {
            return Err(PerfError::invalid("max_cache_size", "must be greater than zero"));
        }
        if default_ttl.is_zero() {
            return Err(PerfError::invalid("default_ttl_secs", "must be greater than zero"));
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                entries: IndexMap::with_capacity(max_size.min(1024)),
                stats: CacheStats {
                    capacity: max_size,
                    ..CacheStats::default()
                },
            }),
            max_size,
            default_ttl,
        })
    }

    /// Returns the value if present and unexpired. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_with(key, |value| Some(value.clone()))
    }

    /// Like `get`, but converts the value under the same lock. A failed
    /// conversion removes the entry and counts as a miss.
    pub fn get_with<R>(&self, key: &str, convert: impl FnOnce(&V) -> Option<R>) -> Option<R> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = Instant::now();

        let Some(entry) = inner.entries.get_mut(key) else {
            inner.stats.misses += 1;
            return None;
        };

        if entry.is_expired(now) {
            inner.entries.shift_remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            tracing::debug!(key, "Cache entry expired on access");
            return None;
        }

        match convert(&entry.value) {
            Some(converted) => {
                entry.hit_count += 1;
                inner.stats.hits += 1;
                Some(converted)
            }
            None => {
                inner.entries.shift_remove(key);
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite an entry with an explicit TTL.
    /// A zero TTL falls back to the store's default.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let ttl = if ttl.is_zero() {
            tracing::debug!(key = %key, "Zero TTL requested; using default");
            self.default_ttl
        } else {
            ttl
        };
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            if let Some((evicted, _)) = inner.entries.shift_remove_index(0) {
                inner.stats.evictions += 1;
                CACHE_EVICTIONS_TOTAL.inc();
                tracing::debug!(evicted = %evicted, incoming = %key, "Cache at capacity; evicted oldest entry");
            }
        }

        inner.entries.insert(key, CacheEntry::new(value, ttl));
    }

    /// Insert using the store's default TTL
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.shift_remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`; returns the count removed
    pub fn delete_by_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(prefix, removed, "Invalidated cache entries by prefix");
        }
        removed
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Sweep expired entries; returns the count removed
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.stats.expirations += removed as u64;
        removed
    }

    /// Presence check without touching hit/miss counters.
    /// An expired entry is removed and reported absent.
    pub fn contains_key(&self, key: &str) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                inner.entries.shift_remove(key);
                inner.stats.expirations += 1;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Keys in eviction order (oldest first)
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            item_count: inner.entries.len(),
            ..inner.stats.clone()
        }
    }
}
