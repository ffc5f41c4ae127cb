//! ID service with fallback manager (component D).
//!
//! Routes `mint_code` requests between the counter allocator and the hash
//! fallback via the circuit breaker in [`super::circuit`], and handles the
//! custom-alias path which bypasses both.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::store::{CounterRepository, MappingRepository};

use super::circuit::{CircuitBreaker, CircuitState};
use super::counter::CounterAllocator;
use super::hashfallback::HashFallbackGenerator;
use super::IdError;

/// Words that can never be claimed as a custom alias because they collide
/// with operational routes.
const RESERVED_ALIASES: &[&str] = &[
    "api", "admin", "login", "logout", "signup", "static", "assets", "go", "www", "help",
    "health", "metrics", "robots.txt", "favicon.ico",
];

/// Which backend produced a minted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MintSource {
    Counter,
    Hash,
    CustomAlias,
}

/// Result of a successful mint.
#[derive(Debug, Clone)]
pub struct MintOutcome {
    pub short_code: String,
    pub source: MintSource,
    /// Collisions observed before success (always 0 outside the hash path).
    pub collisions: u32,
}

fn validate_alias_shape(alias: &str) -> Result<(), IdError> {
    if RESERVED_ALIASES.contains(&alias.to_ascii_lowercase().as_str()) {
        return Err(IdError::AliasReserved(alias.to_string()));
    }
    let valid_chars = alias
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !(3..=30).contains(&alias.len()) || !valid_chars {
        return Err(IdError::AliasInvalid(alias.to_string()));
    }
    Ok(())
}

/// Combines the counter allocator and hash fallback generator behind a
/// circuit breaker.
pub struct IdService<R: MappingRepository + CounterRepository> {
    store: Arc<R>,
    counter: CounterAllocator<R>,
    hash: HashFallbackGenerator<R>,
    breaker: CircuitBreaker,
    min_len: usize,
    probe_interval: Duration,
}

impl<R: MappingRepository + CounterRepository + 'static> IdService<R> {
    pub fn new(
        store: Arc<R>,
        seed: i64,
        range_size: i64,
        hash_config: &crate::config::HashFallbackConfig,
        breaker_config: &crate::config::CircuitBreakerConfig,
        min_len: usize,
    ) -> Self {
        let counter = CounterAllocator::new(store.clone(), seed, range_size);
        let hash = HashFallbackGenerator::new(
            store.clone(),
            hash_config.algo,
            hash_config.min_len,
            hash_config.max_retries,
            hash_config.salt.clone(),
        );
        let probe_interval = Duration::from_secs(breaker_config.probe_interval_secs);
        Self {
            store,
            counter,
            hash,
            breaker: CircuitBreaker::new(breaker_config.failure_threshold, probe_interval),
            min_len,
            probe_interval,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Mint a new short code for `long_url`, routing between the counter
    /// allocator and hash fallback per the breaker's current state.
    pub async fn mint_code(&self, long_url: &str) -> Result<MintOutcome, IdError> {
        match self.breaker.state() {
            CircuitState::Counter => match self.counter.next_id().await {
                Ok(id) => {
                    self.breaker.record_counter_success();
                    Ok(MintOutcome {
                        short_code: crate::codec::base62::encode(id as u64, self.min_len),
                        source: MintSource::Counter,
                        collisions: 0,
                    })
                }
                Err(e) => {
                    self.breaker.record_counter_failure();
                    error!("counter allocation failed: {e}");
                    Err(e)
                }
            },
            CircuitState::Hash => match self.hash.generate(long_url).await {
                Ok(result) => Ok(MintOutcome {
                    short_code: result.short_code,
                    source: MintSource::Hash,
                    collisions: result.collisions,
                }),
                Err(IdError::HashExhausted(n)) => {
                    self.breaker.record_total_failure();
                    Err(IdError::HashExhausted(n))
                }
                Err(e) => Err(e),
            },
            CircuitState::Unavailable => Err(IdError::Unavailable),
        }
    }

    /// Mint via a caller-supplied custom alias, bypassing the counter and
    /// hash paths entirely.
    pub async fn mint_with_alias(&self, alias: &str) -> Result<MintOutcome, IdError> {
        validate_alias_shape(alias)?;

        let taken = self
            .store
            .alias_exists(alias)
            .await
            .map_err(|e| IdError::Store(e.to_string()))?;
        if taken {
            return Err(IdError::AliasTaken(alias.to_string()));
        }

        Ok(MintOutcome {
            short_code: alias.to_string(),
            source: MintSource::CustomAlias,
            collisions: 0,
        })
    }

    /// Run a single half-open probe attempt if one is due. Intended to be
    /// called from a ticking background task (see
    /// [`IdService::spawn_probe_loop`]); exposed separately so tests can
    /// drive it deterministically.
    pub async fn probe_once(&self) {
        if !self.breaker.probe_due() {
            return;
        }
        match self.counter.next_id().await {
            Ok(_) => {
                info!("half-open probe succeeded, closing circuit breaker");
                self.breaker.record_counter_success();
            }
            Err(e) => {
                info!("half-open probe failed: {e}");
            }
        }
    }

    /// Spawn the scheduled half-open probe task. Mirrors the
    /// `scheduling::worker` ticker-task idiom: a dedicated background task
    /// that owns its own interval and is cancelled by dropping the
    /// returned handle.
    pub fn spawn_probe_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.probe_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.probe_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn hash_config() -> crate::config::HashFallbackConfig {
        crate::config::HashFallbackConfig::default()
    }

    fn breaker_config(threshold: u32) -> crate::config::CircuitBreakerConfig {
        crate::config::CircuitBreakerConfig {
            failure_threshold: threshold,
            probe_interval_secs: 30,
        }
    }

    #[tokio::test]
    async fn mint_from_seed_produces_expected_first_code() {
        let store = Arc::new(MemoryStore::new());
        let service = IdService::new(store, 1_000_000, 10_000, &hash_config(), &breaker_config(3), 7);

        let outcome = service.mint_code("https://example.com/x").await.unwrap();
        assert_eq!(outcome.source, MintSource::Counter);
        assert_eq!(outcome.short_code.len(), 7);
    }

    #[tokio::test]
    async fn custom_alias_reserved_word_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = IdService::new(store, 0, 10, &hash_config(), &breaker_config(3), 7);

        let err = service.mint_with_alias("go").await.unwrap_err();
        assert!(matches!(err, IdError::AliasReserved(_)));
    }

    #[tokio::test]
    async fn custom_alias_collision_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let service = IdService::new(store, 0, 10, &hash_config(), &breaker_config(3), 7);

        service.mint_with_alias("promo").await.unwrap();
        let err = service.mint_with_alias("promo").await.unwrap_err();
        assert!(matches!(err, IdError::AliasTaken(_)));
    }

    /// A store whose `reserve_range` always fails, used to drive the
    /// circuit breaker open deterministically.
    struct FailingCounterStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl MappingRepository for FailingCounterStore {
        async fn insert(
            &self,
            m: crate::store::NewMapping,
        ) -> crate::store::StoreResult<crate::store::UrlMapping> {
            self.inner.insert(m).await
        }
        async fn find_by_code(
            &self,
            c: &str,
        ) -> crate::store::StoreResult<Option<crate::store::UrlMapping>> {
            self.inner.find_by_code(c).await
        }
        async fn alias_exists(&self, c: &str) -> crate::store::StoreResult<bool> {
            self.inner.alias_exists(c).await
        }
        async fn record_access(
            &self,
            c: &str,
            at: chrono::DateTime<chrono::Utc>,
        ) -> crate::store::StoreResult<()> {
            self.inner.record_access(c, at).await
        }
        async fn find_expirable(
            &self,
            now: chrono::DateTime<chrono::Utc>,
            limit: i64,
        ) -> crate::store::StoreResult<Vec<crate::store::UrlMapping>> {
            self.inner.find_expirable(now, limit).await
        }
        async fn soft_delete_batch(
            &self,
            codes: &[String],
            at: chrono::DateTime<chrono::Utc>,
        ) -> crate::store::StoreResult<u64> {
            self.inner.soft_delete_batch(codes, at).await
        }
        async fn find_hard_deletable(
            &self,
            cutoff: chrono::DateTime<chrono::Utc>,
            limit: i64,
        ) -> crate::store::StoreResult<Vec<crate::store::UrlMapping>> {
            self.inner.find_hard_deletable(cutoff, limit).await
        }
        async fn hard_delete_batch(&self, codes: &[String]) -> crate::store::StoreResult<u64> {
            self.inner.hard_delete_batch(codes).await
        }
        async fn hottest(&self, n: i64) -> crate::store::StoreResult<Vec<crate::store::UrlMapping>> {
            self.inner.hottest(n).await
        }
    }

    #[async_trait::async_trait]
    impl CounterRepository for FailingCounterStore {
        async fn reserve_range(&self, _seed: i64, _range_size: i64) -> crate::store::StoreResult<i64> {
            Err(crate::store::StoreError::Pool("simulated outage".to_string()))
        }
    }

    #[tokio::test]
    async fn three_consecutive_counter_failures_trip_the_breaker_then_hash_takes_over() {
        let store = Arc::new(FailingCounterStore {
            inner: MemoryStore::new(),
        });
        let service = IdService::new(store, 0, 10, &hash_config(), &breaker_config(3), 7);

        for _ in 0..3 {
            assert!(service.mint_code("https://example.com/y").await.is_err());
        }
        assert_eq!(service.circuit_state(), CircuitState::Hash);

        let outcome = service.mint_code("https://example.com/y").await.unwrap();
        assert_eq!(outcome.source, MintSource::Hash);
    }
}
