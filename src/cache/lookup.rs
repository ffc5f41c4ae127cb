//! Multi-layer lookup (component G): ties the process-local LRU, the
//! distributed cache, and the authoritative store into one waterfall.
//!
//! Grounded on `enterprise::cache::tier::MultiTierCache::get`'s
//! tiered-probe-and-promote control flow, adapted from auto-tiering to a
//! fixed local → distributed → store waterfall with write-through
//! population. Per-key write serialization uses a small ring of sharded
//! locks rather than one global lock, so `populate`/`invalidate` races on
//! different codes never contend.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use log::warn;
use tokio::sync::Mutex as AsyncMutex;

use crate::store::{MappingRepository, UrlMapping};

use super::distributed::DistributedCacheLayer;
use super::local::LocalCache;

const SHARD_COUNT: usize = 64;

/// Which layer satisfied a [`MultiLayerLookup::lookup`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Memory,
    Distributed,
    Store,
}

fn shard_index(code: &str) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    code.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

pub struct MultiLayerLookup<F, R> {
    local: Arc<LocalCache>,
    distributed: Arc<F>,
    store: Arc<R>,
    write_locks: Vec<AsyncMutex<()>>,
}

impl<F, R> MultiLayerLookup<F, R>
where
    F: DistributedCacheLayer + 'static,
    R: MappingRepository + 'static,
{
    pub fn new(local: Arc<LocalCache>, distributed: Arc<F>, store: Arc<R>) -> Self {
        Self {
            local,
            distributed,
            store,
            write_locks: (0..SHARD_COUNT).map(|_| AsyncMutex::new(())).collect(),
        }
    }

    /// Probes memory, then the distributed cache, then the store, populating
    /// faster layers on the way back up. Returns `None` on a confirmed miss
    /// (including a negative marker or a live-but-expired row).
    pub async fn lookup(&self, code: &str) -> Option<(UrlMapping, LookupSource)> {
        if self.distributed.is_marked_expired(code).await {
            return None;
        }

        if let Some(mapping) = self.local.get(code) {
            return Some((mapping, LookupSource::Memory));
        }

        if let Some(mapping) = self.distributed.get(code).await {
            self.local.set(code.to_string(), mapping.clone());
            return Some((mapping, LookupSource::Distributed));
        }

        let mapping = match self.store.find_by_code(code).await {
            Ok(Some(m)) if m.is_live(Utc::now()) => m,
            Ok(Some(_expired)) => {
                self.mark_expired(code).await;
                return None;
            }
            Ok(None) => return None,
            Err(e) => {
                warn!("store lookup failed for {code}: {e}");
                return None;
            }
        };

        self.local.set(code.to_string(), mapping.clone());
        let distributed = self.distributed.clone();
        let populated = mapping.clone();
        tokio::spawn(async move {
            distributed.cache(&populated, None).await;
        });

        Some((mapping, LookupSource::Store))
    }

    pub async fn populate(&self, mapping: &UrlMapping) {
        let _guard = self.write_locks[shard_index(&mapping.short_code)].lock().await;
        self.local.set(mapping.short_code.clone(), mapping.clone());
        self.distributed.cache(mapping, None).await;
    }

    pub async fn invalidate(&self, code: &str) {
        let _guard = self.write_locks[shard_index(code)].lock().await;
        self.local.delete(code);
        self.distributed.remove(code).await;
    }

    pub async fn update(&self, mapping: &UrlMapping) {
        self.populate(mapping).await;
    }

    pub async fn mark_expired(&self, code: &str) {
        let _guard = self.write_locks[shard_index(code)].lock().await;
        self.local.delete(code);
        self.distributed.mark_expired(code).await;
    }

    /// Fetch the `top_n` hottest live mappings from the store and fill both
    /// cache layers.
    pub async fn warm_up(&self, top_n: i64) -> crate::store::StoreResult<usize> {
        let hottest = self.store.hottest(top_n).await?;
        let count = hottest.len();
        for mapping in &hottest {
            self.local.set(mapping.short_code.clone(), mapping.clone());
        }
        self.distributed.batch_cache(&hottest).await;
        Ok(count)
    }
}
