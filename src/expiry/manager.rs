//! Grounded on `scheduling::scheduler`'s `JobSchedule`/batched-execution
//! idiom and `scheduling::worker`'s running health-stat counters, adapted
//! from a generic job queue into two purpose-built sweeps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;

use crate::cache::{DistributedCacheLayer, MultiLayerLookup};
use crate::store::{MappingRepository, UrlMapping};

const SOFT_EXPIRE_BATCH: i64 = 10_000;
const SOFT_EXPIRE_CHUNK: usize = 1_000;
const HARD_DELETE_BATCH: i64 = 10_000;
const HARD_DELETE_CHUNK: usize = 1_000;

/// External archival hook for hard-deleted rows. A real deployment might
/// write to S3 or a cold Postgres partition; tests use a no-op.
#[async_trait]
pub trait ColdStorage: Send + Sync {
    async fn archive(&self, mappings: &[UrlMapping]);
}

pub struct NoopColdStorage;

#[async_trait]
impl ColdStorage for NoopColdStorage {
    async fn archive(&self, _mappings: &[UrlMapping]) {}
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub soft_expire_interval: Duration,
    pub hard_delete_interval: Duration,
    pub hard_delete_retention: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            soft_expire_interval: Duration::from_secs(5 * 60),
            hard_delete_interval: Duration::from_secs(24 * 60 * 60),
            hard_delete_retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Per-run totals plus a running average duration, in the style of
/// `WorkerHealth`'s completed/failed counters.
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub runs: u64,
    pub processed: u64,
    pub affected: u64,
    pub errors: u64,
    pub last_duration: Duration,
    pub avg_duration: Duration,
}

impl SweepStats {
    fn record_run(&mut self, processed: u64, affected: u64, errors: u64, duration: Duration) {
        self.runs += 1;
        self.processed += processed;
        self.affected += affected;
        self.errors += errors;
        self.last_duration = duration;
        let runs = self.runs as u32;
        self.avg_duration = (self.avg_duration * (runs - 1) + duration) / runs;
    }
}

/// Runs the two scheduled sweeps and exposes manual trigger entry points
/// for operators.
pub struct ExpiryManager<F, R> {
    lookup: Arc<MultiLayerLookup<F, R>>,
    store: Arc<R>,
    cold_storage: Arc<dyn ColdStorage>,
    config: SweepConfig,
    soft_stats: Mutex<SweepStats>,
    hard_stats: Mutex<SweepStats>,
    sweeps_run: AtomicU64,
}

impl<F, R> ExpiryManager<F, R>
where
    F: DistributedCacheLayer + 'static,
    R: MappingRepository + 'static,
{
    pub fn new(lookup: Arc<MultiLayerLookup<F, R>>, store: Arc<R>, config: SweepConfig) -> Self {
        Self {
            lookup,
            store,
            cold_storage: Arc::new(NoopColdStorage),
            config,
            soft_stats: Mutex::new(SweepStats::default()),
            hard_stats: Mutex::new(SweepStats::default()),
            sweeps_run: AtomicU64::new(0),
        }
    }

    pub fn with_cold_storage(mut self, cold_storage: Arc<dyn ColdStorage>) -> Self {
        self.cold_storage = cold_storage;
        self
    }

    pub fn soft_expire_stats(&self) -> SweepStats {
        self.soft_stats.lock().clone()
    }

    pub fn hard_delete_stats(&self) -> SweepStats {
        self.hard_stats.lock().clone()
    }

    /// Batches of `SOFT_EXPIRE_BATCH`, chunked into `SOFT_EXPIRE_CHUNK` for
    /// cache invalidation. Continues until a batch returns fewer rows than
    /// the batch size. A failing chunk is logged and skipped; the sweep
    /// keeps going with the next chunk.
    pub async fn run_soft_expire_sweep(&self) -> SweepStats {
        let started = Instant::now();
        let now = Utc::now();
        let mut processed = 0u64;
        let mut affected = 0u64;
        let mut errors = 0u64;

        loop {
            let batch = match self.store.find_expirable(now, SOFT_EXPIRE_BATCH).await {
                Ok(rows) => rows,
                Err(e) => {
                    error!("soft-expire sweep failed to query batch: {e}");
                    errors += 1;
                    break;
                }
            };
            let batch_len = batch.len();
            processed += batch_len as u64;

            for chunk in batch.chunks(SOFT_EXPIRE_CHUNK) {
                let codes: Vec<String> = chunk.iter().map(|m| m.short_code.clone()).collect();
                match self.store.soft_delete_batch(&codes, now).await {
                    Ok(count) => {
                        affected += count;
                        for code in &codes {
                            self.lookup.mark_expired(code).await;
                        }
                    }
                    Err(e) => {
                        warn!("soft-expire chunk of {} rows failed: {e}", codes.len());
                        errors += 1;
                    }
                }
            }

            if (batch_len as i64) < SOFT_EXPIRE_BATCH {
                break;
            }
        }

        let duration = started.elapsed();
        info!("soft-expire sweep processed={processed} affected={affected} errors={errors} duration={duration:?}");
        let mut stats = self.soft_stats.lock();
        stats.record_run(processed, affected, errors, duration);
        self.sweeps_run.fetch_add(1, Ordering::Relaxed);
        stats.clone()
    }

    /// Batches of `HARD_DELETE_BATCH`, archiving each chunk before delete.
    pub async fn run_hard_delete_sweep(&self) -> SweepStats {
        let started = Instant::now();
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.hard_delete_retention).unwrap_or_default();
        let mut processed = 0u64;
        let mut affected = 0u64;
        let mut errors = 0u64;

        loop {
            let batch = match self.store.find_hard_deletable(cutoff, HARD_DELETE_BATCH).await {
                Ok(rows) => rows,
                Err(e) => {
                    error!("hard-delete sweep failed to query batch: {e}");
                    errors += 1;
                    break;
                }
            };
            let batch_len = batch.len();
            processed += batch_len as u64;

            for chunk in batch.chunks(HARD_DELETE_CHUNK) {
                self.cold_storage.archive(chunk).await;
                let codes: Vec<String> = chunk.iter().map(|m| m.short_code.clone()).collect();
                match self.store.hard_delete_batch(&codes).await {
                    Ok(count) => affected += count,
                    Err(e) => {
                        warn!("hard-delete chunk of {} rows failed: {e}", codes.len());
                        errors += 1;
                    }
                }
            }

            if (batch_len as i64) < HARD_DELETE_BATCH {
                break;
            }
        }

        let duration = started.elapsed();
        info!("hard-delete sweep processed={processed} affected={affected} errors={errors} duration={duration:?}");
        let mut stats = self.hard_stats.lock();
        stats.record_run(processed, affected, errors, duration);
        stats.clone()
    }

    pub fn spawn_soft_expire_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.soft_expire_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.run_soft_expire_sweep().await;
            }
        })
    }

    pub fn spawn_hard_delete_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.hard_delete_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.run_hard_delete_sweep().await;
            }
        })
    }

    pub fn store(&self) -> &Arc<R> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocalCache, MemoryDistributedCache};
    use crate::store::memory::MemoryStore;
    use crate::store::NewMapping;

    fn manager() -> ExpiryManager<MemoryDistributedCache, MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let lookup = Arc::new(MultiLayerLookup::new(
            Arc::new(LocalCache::new(16)),
            Arc::new(MemoryDistributedCache::default()),
            store.clone(),
        ));
        ExpiryManager::new(lookup, store, SweepConfig::default())
    }

    #[tokio::test]
    async fn soft_expire_sweep_tombstones_due_mappings_and_invalidates_cache() {
        let manager = manager();
        let mapping = manager
            .store
            .insert(NewMapping {
                short_code: "exp0001".to_string(),
                long_url: "https://example.com".to_string(),
                long_url_hash: "h".to_string(),
                expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                user_id: None,
                is_custom_alias: false,
            })
            .await
            .unwrap();

        manager.lookup.populate(&mapping).await;
        assert!(manager.lookup.lookup("exp0001").await.is_some());

        let stats = manager.run_soft_expire_sweep().await;
        assert_eq!(stats.affected, 1);
        assert_eq!(stats.errors, 0);
        assert!(manager.lookup.lookup("exp0001").await.is_none());
    }

    #[tokio::test]
    async fn hard_delete_sweep_leaves_recently_tombstoned_rows_alone() {
        let manager = manager();
        let mapping = manager
            .store
            .insert(NewMapping {
                short_code: "old0001".to_string(),
                long_url: "https://example.com".to_string(),
                long_url_hash: "h".to_string(),
                expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                user_id: None,
                is_custom_alias: false,
            })
            .await
            .unwrap();
        manager.store.soft_delete_batch(&[mapping.short_code.clone()], Utc::now()).await.unwrap();

        let stats = manager.run_hard_delete_sweep().await;
        assert_eq!(stats.affected, 0);
    }

    #[tokio::test]
    async fn stats_track_a_running_average_duration_across_runs() {
        let manager = manager();
        manager.run_soft_expire_sweep().await;
        manager.run_soft_expire_sweep().await;
        let stats = manager.soft_expire_stats();
        assert_eq!(stats.runs, 2);
    }
}
