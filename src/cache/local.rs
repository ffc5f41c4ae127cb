//! Process-local LRU (component E).
//!
//! Grounded on `enterprise::cache::tier::LruCache`'s get/insert/evict shape
//! and its `MultiTierCache::get_stats` hit/miss counters, but backed by the
//! `lru` crate's intrusive doubly-linked-list map instead of a `Vec` access
//! order, so every operation below is O(1) instead of O(n).

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::store::UrlMapping;

struct Entry {
    value: UrlMapping,
    inserted_at: Instant,
}

/// Point-in-time statistics snapshot for a [`LocalCache`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
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

/// Thread-safe LRU cache of short-code to mapping snapshot. All public
/// operations are serialized behind a single mutex, matching the
/// "implementer may use a single mutex" option for the linearizable
/// semantics contract.
pub struct LocalCache {
    inner: Mutex<LruCache<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Move `key` to the head if present and return its value.
    pub fn get(&self, key: &str) -> Option<UrlMapping> {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert at the head, evicting the tail if this pushes the cache over
    /// capacity.
    pub fn set(&self, key: String, value: UrlMapping) {
        let mut cache = self.inner.lock();
        let will_evict = !cache.contains(&key) && cache.len() == cache.cap().get();
        cache.push(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        if will_evict {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn delete(&self, key: &str) {
        self.inner.lock().pop(key);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Shrink or grow capacity, evicting from the tail if shrinking below
    /// the current size.
    pub fn resize(&self, new_capacity: usize) {
        let cap = NonZeroUsize::new(new_capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        let mut cache = self.inner.lock();
        let before = cache.len();
        cache.resize(cap);
        let evicted = before.saturating_sub(cache.len());
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Evict every entry whose age exceeds `age`, oldest first.
    pub fn evict_older_than(&self, age: Duration) {
        let mut cache = self.inner.lock();
        let stale: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > age)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            cache.pop(key);
        }
        if !stale.is_empty() {
            self.evictions.fetch_add(stale.len() as u64, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.inner.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: cache.len(),
            max_size: cache.cap().get(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
