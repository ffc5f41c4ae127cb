//! Connection pool configuration, adapted from the teacher's
//! `database::connection_pool::DatabaseConfig` with the CAD-specific knobs
//! (WAL mode, SQLite busy timeout) dropped in favor of the Postgres knobs
//! this store actually uses.

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPoolOptions, PgConnectOptions};
use std::str::FromStr;
use std::time::Duration;

use super::StoreError;

/// Pool sizing and timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/shortlink".to_string(),
            min_connections: 5,
            max_connections: 50,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
        }
    }
}

impl From<&crate::config::StoreConfig> for PoolConfig {
    fn from(c: &crate::config::StoreConfig) -> Self {
        Self {
            url: c.url.clone(),
            min_connections: c.min_connections,
            max_connections: c.max_connections,
            connect_timeout_secs: c.connect_timeout_secs,
            idle_timeout_secs: 600,
        }
    }
}

/// Build a Postgres connection pool from [`PoolConfig`].
pub async fn connect(config: &PoolConfig) -> Result<sqlx::PgPool, StoreError> {
    let options = PgConnectOptions::from_str(&config.url)
        .map_err(|e| StoreError::Pool(e.to_string()))?;

    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect_with(options)
        .await
        .map_err(StoreError::Query)
}
