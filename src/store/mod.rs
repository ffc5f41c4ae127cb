//! Authoritative relational store.
//!
//! Defines the short-link data model as typed records, the three
//! repository traits the rest of the crate depends on, and a
//! [`PgStore`] implementation backed by `sqlx::PgPool`. [`memory::MemoryStore`]
//! is a real (non-test-gated) in-memory implementation used by the
//! integration tests and anywhere a live Postgres instance is unavailable,
//! following the teacher's `enterprise::cache::strategy::InMemoryStore`
//! precedent of shipping an in-memory backing store alongside the real one.

pub mod memory;
pub mod pool;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pool::PoolConfig;
pub use postgres::PgStore;

/// Store-layer error taxonomy, converted into [`crate::error::AppError`] at
/// the component boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query execution error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("row not found")]
    NotFound,

    #[error("constraint violation: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// `url_mappings` row: a short code and the long URL it redirects to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrlMapping {
    pub short_code: String,
    pub long_url: String,
    pub long_url_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub is_custom_alias: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: i64,
}

impl UrlMapping {
    /// `expires_at <= now`, the condition that makes a mapping invisible to
    /// reads regardless of the soft-delete flag.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }

    /// A mapping is visible to lookups only while neither tombstoned nor
    /// past its expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.is_deleted && !self.is_expired_at(now)
    }
}

/// Everything needed to persist a brand new mapping.
#[derive(Debug, Clone)]
pub struct NewMapping {
    pub short_code: String,
    pub long_url: String,
    pub long_url_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub is_custom_alias: bool,
}

/// `analytics_events` row (raw click, retained at operator discretion).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: String,
    pub short_code: String,
    pub clicked_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
}

/// `analytics_daily_summaries` row, the system of record for historical
/// analytics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailySummary {
    pub short_code: String,
    pub date: chrono::NaiveDate,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub top_countries: Vec<CountedDimension>,
    pub top_referrers: Vec<CountedDimension>,
    pub device_breakdown: Vec<CountedDimension>,
    pub browser_breakdown: Vec<CountedDimension>,
    pub hourly_distribution: [i64; 24],
    pub peak_hour: u8,
    pub avg_clicks_per_hour: f64,
}

/// A `{name, clicks}` entry used for top-N lists and breakdowns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountedDimension {
    pub name: String,
    pub clicks: i64,
}

impl DailySummary {
    /// An empty summary for `(short_code, date)`, ready to accumulate
    /// additive updates from window flushes.
    pub fn empty(short_code: String, date: chrono::NaiveDate) -> Self {
        Self {
            short_code,
            date,
            total_clicks: 0,
            unique_visitors: 0,
            top_countries: Vec::new(),
            top_referrers: Vec::new(),
            device_breakdown: Vec::new(),
            browser_breakdown: Vec::new(),
            hourly_distribution: [0; 24],
            peak_hour: 0,
            avg_clicks_per_hour: 0.0,
        }
    }

    /// Recompute `peak_hour` and `avg_clicks_per_hour` from
    /// `hourly_distribution`. Called after every additive merge so the
    /// derived fields never drift from the source counts.
    pub fn recompute_derived(&mut self) {
        let (hour, _) = self
            .hourly_distribution
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .unwrap_or((0, &0));
        self.peak_hour = hour as u8;

        let active_hours = self.hourly_distribution.iter().filter(|c| **c > 0).count();
        self.avg_clicks_per_hour = if active_hours == 0 {
            0.0
        } else {
            self.total_clicks as f64 / active_hours as f64
        };
    }
}

/// Merges a top-N dimension breakdown additively, the way
/// `analytics_repo::merge_daily_summary` does for every flush.
pub fn merge_counted(existing: &mut Vec<CountedDimension>, delta: &[CountedDimension]) {
    for d in delta {
        if let Some(e) = existing.iter_mut().find(|e| e.name == d.name) {
            e.clicks += d.clicks;
        } else {
            existing.push(d.clone());
        }
    }
    existing.sort_by(|a, b| b.clicks.cmp(&a.clicks));
}

/// Repository for `url_mappings`.
#[async_trait]
pub trait MappingRepository: Send + Sync {
    async fn insert(&self, mapping: NewMapping) -> StoreResult<UrlMapping>;
    async fn find_by_code(&self, short_code: &str) -> StoreResult<Option<UrlMapping>>;
    async fn alias_exists(&self, short_code: &str) -> StoreResult<bool>;
    async fn record_access(&self, short_code: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Mappings with `expires_at <= now AND NOT is_deleted`, oldest first,
    /// capped at `limit` rows, for the soft-expire sweep.
    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<UrlMapping>>;

    /// Marks a chunk of short codes as soft-deleted. Idempotent: already
    /// tombstoned rows are left untouched so a repeated sweep is a no-op.
    async fn soft_delete_batch(
        &self,
        short_codes: &[String],
        at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Rows with `deleted_at < cutoff`, for the hard-delete sweep.
    async fn find_hard_deletable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<UrlMapping>>;

    async fn hard_delete_batch(&self, short_codes: &[String]) -> StoreResult<u64>;

    /// The `top_n` most-accessed live mappings, for cache warm-up.
    async fn hottest(&self, top_n: i64) -> StoreResult<Vec<UrlMapping>>;
}

/// Repository for the `id_counter` singleton row (component B).
#[async_trait]
pub trait CounterRepository: Send + Sync {
    /// Atomically reserves the next `range_size` IDs: locks the singleton
    /// row (initializing it to `seed` if absent), reads the current value
    /// as `new_start`, advances the stored value by `range_size`, and
    /// returns `new_start`. Callers get `[new_start, new_start + range_size)`.
    async fn reserve_range(&self, seed: i64, range_size: i64) -> StoreResult<i64>;
}

/// Repository for `analytics_events` and `analytics_daily_summaries`.
#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn insert_event(&self, event: &AnalyticsEvent) -> StoreResult<()>;

    /// Idempotent upsert: merges `delta` into the existing `(short_code,
    /// date)` row additively (counts add, dimension breakdowns merge,
    /// hourly distribution adds per-hour) rather than overwriting.
    async fn merge_daily_summary(&self, delta: &DailySummary) -> StoreResult<DailySummary>;

    async fn get_daily_summary(
        &self,
        short_code: &str,
        date: chrono::NaiveDate,
    ) -> StoreResult<Option<DailySummary>>;
}
