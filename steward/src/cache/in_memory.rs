//! In-memory cache with TTL expiration, LRU eviction, and hit/miss metrics.
//!
//! Entries carry their creation time and an access tick; when the size limit
//! is exceeded the least recently used entry is evicted. Expired entries are
//! dropped lazily on access and eagerly by [`InMemoryCache::sweep_expired`]
//! (called from the background maintenance task).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use super::{Cache, CacheError};

const DEFAULT_MAX_SIZE: usize = 10_000;

struct Entry<V> {
    value: V,
    created_at: Instant,
    ttl: Option<Duration>,
    last_used: u64,
    access_count: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.created_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// Counters exposed on the stats endpoint.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

/// In-memory [`Cache`] implementation with LRU + TTL.
pub struct InMemoryCache<K = String, V = serde_json::Value> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    max_size: usize,
    default_ttl: Option<Duration>,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for InMemoryCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> InMemoryCache<K, V> {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SIZE, None)
    }

    pub fn with_limits(max_size: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size,
            default_ttl,
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Synchronous get, shared by the async trait impl and callers that hold
    /// no async context.
    pub fn get_sync(&self, key: &K) -> Option<V> {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.last_used = self.tick.fetch_add(1, Ordering::Relaxed);
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set_sync(&self, key: K, value: V, ttl: Option<Duration>) {
        let tick = self.next_tick();
        let mut entries = self.lock();
        entries.insert(
            key,
            Entry {
                value,
                created_at: Instant::now(),
                ttl: ttl.or(self.default_ttl),
                last_used: tick,
                access_count: 0,
            },
        );
        if entries.len() > self.max_size {
            // Evict the least recently used entry.
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru_key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Removes expired entries eagerly; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        let dropped = before - entries.len();
        self.expirations.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.len(),
            max_size: self.max_size,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

impl<V: Clone> InMemoryCache<String, V> {
    /// Removes every entry whose key starts with `prefix`; returns the count.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }
}

#[async_trait]
impl<K, V> Cache<K, V> for InMemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &K) -> Option<V> {
        self.get_sync(key)
    }

    async fn set(&self, key: K, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.set_sync(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), CacheError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.lock().clear();
        Ok(())
    }
}
