//! # shortlink-core
//!
//! Core engineering of a URL shortener: short-code minting with a
//! circuit-breaker-guarded fallback, a three-tier lookup cache, click
//! ingestion and windowed aggregation, and a scheduled expiry lifecycle.
//!
//! ## Architecture
//!
//! - `codec`: Base62 encode/decode (component A)
//! - `id`: counter allocator, hash fallback, and the circuit-breaker ID
//!   service (components B–D)
//! - `cache`: process-local LRU, distributed cache adapter, and the
//!   multi-layer lookup waterfall (components E–G)
//! - `events`: click event wire format, bus abstraction, buffered
//!   producer, and windowed aggregation consumer (components H–I)
//! - `expiry`: scheduled soft-expire and hard-delete sweeps (component J)
//! - `geoip`: non-blocking cached IP geolocation (component K)
//! - `analytics`: memoized analytics query cache (component L)
//! - `store`: the authoritative relational model and repositories
//! - `config`: `AppConfig` and per-component settings
//! - `error`: the crate-wide `AppError` taxonomy

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod analytics;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod geoip;
pub mod id;
pub mod store;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

use std::sync::Arc;

use store::PgStore;

/// Everything a running process needs to serve redirects, ingest clicks,
/// and run the background sweeps, assembled once at startup from one
/// [`AppConfig`].
///
/// Generic over the distributed cache implementation so tests can swap in
/// [`cache::MemoryDistributedCache`] without a live Redis connection.
pub struct AppContext<F: cache::DistributedCacheLayer + 'static> {
    /// ID minting: counter allocator, hash fallback, circuit breaker.
    pub id_service: Arc<id::IdService<PgStore>>,
    /// Three-tier read path backing every redirect lookup.
    pub lookup: Arc<cache::MultiLayerLookup<F, PgStore>>,
    /// Buffered, partition-aware producer for click events.
    pub click_producer: Arc<events::ClickEventProducer>,
    /// Scheduled soft-expire and hard-delete sweeps.
    pub expiry: Arc<expiry::ExpiryManager<F, PgStore>>,
    /// Memoized analytics report cache.
    pub query_cache: Arc<analytics::AnalyticsQueryCache<serde_json::Value>>,
    /// Non-blocking cached IP geolocation, consulted when recording clicks.
    pub geoip: Arc<geoip::GeoIpEnricher<geoip::HttpGeoIpProvider>>,
    /// The authoritative store, shared by every component above.
    pub store: Arc<PgStore>,
}

impl AppContext<cache::DistributedCache> {
    /// Build a production context: connects to Postgres and Redis, and
    /// runs pending migrations. Any failure here is a fatal startup error.
    pub async fn connect(config: &AppConfig, bus: Arc<dyn events::ClickBus>) -> AppResult<Self> {
        let pool_config = store::pool::PoolConfig::from(&config.store);
        let pool = store::pool::connect(&pool_config)
            .await
            .map_err(|e| AppError::Fatal(e.to_string()))?;
        let store = Arc::new(PgStore::new(pool));
        store.migrate().await.map_err(|e| AppError::Fatal(e.to_string()))?;

        let distributed = Arc::new(
            cache::DistributedCache::connect(&config.distributed_cache)
                .await
                .map_err(|e| AppError::Fatal(e.to_string()))?,
        );

        Ok(Self::assemble(config, store, distributed, bus))
    }
}

impl<F: cache::DistributedCacheLayer + 'static> AppContext<F> {
    /// Wire every component together from already-constructed store and
    /// distributed-cache handles. Split out from [`AppContext::connect`]
    /// so tests can pass [`cache::MemoryDistributedCache`] and a
    /// `sqlite::memory:` store without touching any live dependency.
    pub fn assemble(config: &AppConfig, store: Arc<PgStore>, distributed: Arc<F>, bus: Arc<dyn events::ClickBus>) -> Self {
        let local = Arc::new(cache::LocalCache::new(config.lru.capacity));
        let lookup = Arc::new(cache::MultiLayerLookup::new(local, distributed, store.clone()));

        let id_service = Arc::new(id::IdService::new(
            store.clone(),
            config.counter.seed,
            config.counter.range_size,
            &config.hash_fallback,
            &config.circuit_breaker,
            config.hash_fallback.min_len,
        ));

        let click_producer = Arc::new(events::ClickEventProducer::new(bus, config.producer.buffer_capacity));

        let expiry = Arc::new(expiry::ExpiryManager::new(
            lookup.clone(),
            store.clone(),
            expiry::SweepConfig {
                soft_expire_interval: std::time::Duration::from_secs(config.expiry.soft_expire_interval_secs),
                hard_delete_interval: std::time::Duration::from_secs(24 * 60 * 60),
                hard_delete_retention: std::time::Duration::from_secs(config.expiry.hard_delete_retention_days as u64 * 24 * 60 * 60),
            },
        ));

        let query_cache = Arc::new(analytics::AnalyticsQueryCache::new());

        let geoip_provider = Arc::new(geoip::HttpGeoIpProvider::new(config.geoip.base_url.clone()));
        let geoip = Arc::new(geoip::GeoIpEnricher::with_settings(
            geoip_provider,
            config.geoip.cache_capacity,
            std::time::Duration::from_secs(config.geoip.cache_ttl_secs),
            std::time::Duration::from_millis(config.geoip.min_request_spacing_ms),
        ));

        Self {
            id_service,
            lookup,
            click_producer,
            expiry,
            query_cache,
            geoip,
            store,
        }
    }

    /// Start every background task (ID probe loop, producer flusher,
    /// expiry sweeps). The aggregation consumer is started separately by
    /// the `aggregation-consumer` binary, since it runs as its own
    /// process in a typical deployment.
    pub async fn spawn_background_tasks(self: &Arc<Self>) {
        self.id_service.clone().spawn_probe_loop();
        self.click_producer.connect(8).await;
        self.click_producer.clone().spawn_flush_loop(std::time::Duration::from_secs(5));
        self.expiry.clone().spawn_soft_expire_loop();
        self.expiry.clone().spawn_hard_delete_loop();
        self.geoip.clone().spawn_drain_loop();
    }
}

/// Crate version, re-exported for operator-facing banners and `/health`
/// responses.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, re-exported for the same reason as [`VERSION`].
pub const NAME: &str = env!("CARGO_PKG_NAME");
