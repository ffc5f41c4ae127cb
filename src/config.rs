//! Application configuration.
//!
//! Follows the teacher pattern of a single JSON-backed config struct with a
//! `Default` impl and `from_file`/`save` helpers, plus environment variable
//! overrides for the handful of settings operators most commonly tune
//! per-deployment (store URL, cache URL, bus brokers).

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration load/save failures. Always escalate to `AppError::Fatal`
/// at the call site, per the error design's startup-failure policy.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Counter allocator settings (component B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Seed value for the singleton counter row when it does not yet exist.
    pub seed: i64,
    /// Size of each reserved range.
    pub range_size: i64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            seed: 1_000_000,
            range_size: 10_000,
        }
    }
}

/// Hash fallback generator settings (component C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashFallbackConfig {
    pub algo: crate::id::hashfallback::HashAlgo,
    pub min_len: usize,
    pub max_retries: u32,
    pub salt: String,
}

impl Default for HashFallbackConfig {
    fn default() -> Self {
        Self {
            algo: crate::id::hashfallback::HashAlgo::Sha256,
            min_len: 7,
            max_retries: 3,
            salt: "shortlink-default-salt".to_string(),
        }
    }
}

/// Circuit breaker settings (component D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive counter failures before opening the breaker.
    pub failure_threshold: u32,
    /// Half-open probe interval in seconds.
    pub probe_interval_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            probe_interval_secs: 30,
        }
    }
}

/// Process-local LRU settings (component E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LruConfig {
    pub capacity: usize,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Distributed cache settings (component F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedCacheConfig {
    pub redis_url: String,
    pub default_ttl_secs: u64,
    pub expired_marker_ttl_secs: u64,
    /// Entries with fewer than this many seconds left before `expires_at`
    /// are not cached at all.
    pub min_remaining_secs: u64,
}

impl Default for DistributedCacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            default_ttl_secs: 24 * 3600,
            expired_marker_ttl_secs: 7 * 24 * 3600,
            min_remaining_secs: 60,
        }
    }
}

/// Click event producer settings (component H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub buffer_capacity: usize,
    pub flush_interval_secs: u64,
    pub max_connect_attempts: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            flush_interval_secs: 5,
            max_connect_attempts: 8,
        }
    }
}

/// Aggregation consumer settings (component I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub window_size_secs: i64,
    pub flush_interval_secs: u64,
    pub late_grace_secs: i64,
    pub consumer_group: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            window_size_secs: 5 * 60,
            flush_interval_secs: 60,
            late_grace_secs: 60,
            consumer_group: "aggregation-consumer".to_string(),
        }
    }
}

/// Expiry manager settings (component J).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryConfig {
    pub soft_expire_interval_secs: u64,
    pub soft_expire_batch_size: i64,
    pub soft_expire_chunk_size: i64,
    pub hard_delete_retention_days: i64,
    pub hard_delete_batch_size: i64,
    pub archive_to_cold_storage: bool,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            soft_expire_interval_secs: 5 * 60,
            soft_expire_batch_size: 10_000,
            soft_expire_chunk_size: 1_000,
            hard_delete_retention_days: 30,
            hard_delete_batch_size: 5_000,
            archive_to_cold_storage: false,
        }
    }
}

/// GeoIP enricher settings (component K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    pub base_url: String,
    pub min_request_spacing_ms: u64,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub sync_timeout_ms: u64,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ip-api.com".to_string(),
            min_request_spacing_ms: 1_400,
            cache_capacity: 10_000,
            cache_ttl_secs: 24 * 3600,
            sync_timeout_ms: 2_000,
        }
    }
}

/// Analytics query cache settings (component L).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsCacheConfig {
    pub per_url_ttl_secs: u64,
    pub global_ttl_secs: u64,
    pub realtime_ttl_secs: u64,
}

impl Default for AnalyticsCacheConfig {
    fn default() -> Self {
        Self {
            per_url_ttl_secs: 5 * 60,
            global_ttl_secs: 10 * 60,
            realtime_ttl_secs: 60,
        }
    }
}

/// Store (authoritative relational backend) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 10,
            connect_timeout_secs: 10,
        }
    }
}

/// Root application configuration, assembled once at process start and
/// handed to each component's constructor (see [`crate::AppContext`]).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub counter: CounterConfig,
    pub hash_fallback: HashFallbackConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub lru: LruConfig,
    pub distributed_cache: DistributedCacheConfig,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
    pub expiry: ExpiryConfig,
    pub geoip: GeoIpConfig,
    pub analytics_cache: AnalyticsCacheConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file on disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Persist configuration as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Overlay environment variables (`SHORTLINK_STORE_URL`,
    /// `SHORTLINK_REDIS_URL`) on top of whatever was loaded from file or
    /// defaults. Operators use this to avoid baking connection strings into
    /// the config file.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("SHORTLINK_STORE_URL") {
            self.store.url = url;
        }
        if let Ok(url) = std::env::var("SHORTLINK_REDIS_URL") {
            self.distributed_cache.redis_url = url;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.counter.seed, config.counter.seed);
        assert_eq!(parsed.counter.range_size, 10_000);
    }

    #[test]
    fn env_override_replaces_store_url() {
        std::env::set_var("SHORTLINK_STORE_URL", "postgres://test/db");
        let config = AppConfig::default().apply_env_overrides();
        assert_eq!(config.store.url, "postgres://test/db");
        std::env::remove_var("SHORTLINK_STORE_URL");
    }
}
