//! In-memory stand-in for [`super::distributed::DistributedCacheLayer`],
//! used by tests that exercise the lookup waterfall without a live Redis
//! instance.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::store::UrlMapping;

use super::distributed::DistributedCacheLayer;

struct Slot {
    mapping: UrlMapping,
    expires_at: Instant,
}

pub struct MemoryDistributedCache {
    entries: DashMap<String, Slot>,
    expired_markers: DashMap<String, Instant>,
    default_ttl: Duration,
    expired_marker_ttl: Duration,
    min_remaining: Duration,
}

impl MemoryDistributedCache {
    pub fn new(default_ttl: Duration, expired_marker_ttl: Duration, min_remaining: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            expired_markers: DashMap::new(),
            default_ttl,
            expired_marker_ttl,
            min_remaining,
        }
    }
}

impl Default for MemoryDistributedCache {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(86_400),
            Duration::from_secs(604_800),
            Duration::from_secs(60),
        )
    }
}

#[async_trait]
impl DistributedCacheLayer for MemoryDistributedCache {
    async fn cache(&self, mapping: &UrlMapping, ttl: Option<Duration>) -> bool {
        let effective_ttl = match ttl {
            Some(t) => t,
            None => {
                let bound = mapping
                    .expires_at
                    .map(|e| (e - Utc::now()).num_seconds().max(0) as u64)
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_ttl);
                self.default_ttl.min(bound)
            }
        };
        if effective_ttl <= self.min_remaining {
            return false;
        }
        self.entries.insert(
            mapping.short_code.clone(),
            Slot {
                mapping: mapping.clone(),
                expires_at: Instant::now() + effective_ttl,
            },
        );
        true
    }

    async fn get(&self, code: &str) -> Option<UrlMapping> {
        let slot = self.entries.get(code)?;
        if slot.expires_at <= Instant::now() {
            drop(slot);
            self.entries.remove(code);
            return None;
        }
        if slot.mapping.is_expired_at(Utc::now()) {
            let mapping = slot.mapping.clone();
            drop(slot);
            self.entries.remove(code);
            let _ = mapping;
            return None;
        }
        Some(slot.mapping.clone())
    }

    async fn remove(&self, code: &str) {
        self.entries.remove(code);
    }

    async fn batch_cache(&self, mappings: &[UrlMapping]) {
        for mapping in mappings {
            self.cache(mapping, None).await;
        }
    }

    async fn mark_expired(&self, code: &str) {
        self.expired_markers
            .insert(code.to_string(), Instant::now() + self.expired_marker_ttl);
    }

    async fn is_marked_expired(&self, code: &str) -> bool {
        match self.expired_markers.get(code) {
            Some(until) if *until > Instant::now() => true,
            _ => false,
        }
    }
}
