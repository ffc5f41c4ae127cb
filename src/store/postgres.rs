//! Postgres-backed implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::{
    merge_counted, AnalyticsEvent, AnalyticsRepository, CounterRepository, DailySummary,
    MappingRepository, NewMapping, StoreError, StoreResult, UrlMapping,
};

/// Authoritative store backed by a Postgres connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migration set. Schema mismatches that survive this
    /// are a fatal startup error.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_mapping(row: &sqlx::postgres::PgRow) -> Result<UrlMapping, sqlx::Error> {
    Ok(UrlMapping {
        short_code: row.try_get("short_code")?,
        long_url: row.try_get("long_url")?,
        long_url_hash: row.try_get("long_url_hash")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        user_id: row.try_get("user_id")?,
        is_custom_alias: row.try_get("is_custom_alias")?,
        is_deleted: row.try_get("is_deleted")?,
        deleted_at: row.try_get("deleted_at")?,
        last_accessed_at: row.try_get("last_accessed_at")?,
        access_count: row.try_get("access_count")?,
    })
}

#[async_trait]
impl MappingRepository for PgStore {
    async fn insert(&self, mapping: NewMapping) -> StoreResult<UrlMapping> {
        let row = sqlx::query(
            r#"
            INSERT INTO url_mappings
                (short_code, long_url, long_url_hash, expires_at, user_id, is_custom_alias)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING short_code, long_url, long_url_hash, created_at, expires_at, user_id,
                      is_custom_alias, is_deleted, deleted_at, last_accessed_at, access_count
            "#,
        )
        .bind(&mapping.short_code)
        .bind(&mapping.long_url)
        .bind(&mapping.long_url_hash)
        .bind(mapping.expires_at)
        .bind(&mapping.user_id)
        .bind(mapping.is_custom_alias)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(mapping.short_code.clone())
            }
            _ => StoreError::Query(e),
        })?;

        row_to_mapping(&row).map_err(StoreError::Query)
    }

    async fn find_by_code(&self, short_code: &str) -> StoreResult<Option<UrlMapping>> {
        let row = sqlx::query(
            r#"
            SELECT short_code, long_url, long_url_hash, created_at, expires_at, user_id,
                   is_custom_alias, is_deleted, deleted_at, last_accessed_at, access_count
            FROM url_mappings WHERE short_code = $1
            "#,
        )
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(row_to_mapping)
            .transpose()
            .map_err(StoreError::Query)
    }

    async fn alias_exists(&self, short_code: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM url_mappings WHERE short_code = $1")
            .bind(short_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn record_access(&self, short_code: &str, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE url_mappings SET last_accessed_at = $1, access_count = access_count + 1 \
             WHERE short_code = $2",
        )
        .bind(at)
        .bind(short_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<UrlMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT short_code, long_url, long_url_hash, created_at, expires_at, user_id,
                   is_custom_alias, is_deleted, deleted_at, last_accessed_at, access_count
            FROM url_mappings
            WHERE expires_at <= $1 AND is_deleted = FALSE
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect::<Result<_, _>>().map_err(StoreError::Query)
    }

    async fn soft_delete_batch(
        &self,
        short_codes: &[String],
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if short_codes.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE url_mappings SET is_deleted = TRUE, deleted_at = $1 \
             WHERE short_code = ANY($2) AND is_deleted = FALSE",
        )
        .bind(at)
        .bind(short_codes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_hard_deletable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<UrlMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT short_code, long_url, long_url_hash, created_at, expires_at, user_id,
                   is_custom_alias, is_deleted, deleted_at, last_accessed_at, access_count
            FROM url_mappings
            WHERE is_deleted = TRUE AND deleted_at < $1
            ORDER BY deleted_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect::<Result<_, _>>().map_err(StoreError::Query)
    }

    async fn hard_delete_batch(&self, short_codes: &[String]) -> StoreResult<u64> {
        if short_codes.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM url_mappings WHERE short_code = ANY($1)")
            .bind(short_codes)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn hottest(&self, top_n: i64) -> StoreResult<Vec<UrlMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT short_code, long_url, long_url_hash, created_at, expires_at, user_id,
                   is_custom_alias, is_deleted, deleted_at, last_accessed_at, access_count
            FROM url_mappings
            WHERE is_deleted = FALSE
            ORDER BY access_count DESC
            LIMIT $1
            "#,
        )
        .bind(top_n)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect::<Result<_, _>>().map_err(StoreError::Query)
    }
}

#[async_trait]
impl CounterRepository for PgStore {
    async fn reserve_range(&self, seed: i64, range_size: i64) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        // Lock the singleton row for the duration of the transaction;
        // initialize it on first use.
        let existing = sqlx::query("SELECT current_value FROM id_counter WHERE counter_id = 1 FOR UPDATE")
            .fetch_optional(&mut *tx)
            .await?;

        let new_start = match existing {
            Some(row) => {
                let current_value: i64 = row.try_get("current_value")?;
                current_value
            }
            None => seed,
        };

        sqlx::query(
            r#"
            INSERT INTO id_counter (counter_id, current_value, last_updated)
            VALUES (1, $1, now())
            ON CONFLICT (counter_id)
            DO UPDATE SET current_value = $1, last_updated = now()
            "#,
        )
        .bind(new_start + range_size)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(new_start)
    }
}

#[async_trait]
impl AnalyticsRepository for PgStore {
    async fn insert_event(&self, event: &AnalyticsEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analytics_events
                (event_id, short_code, clicked_at, ip_address, user_agent, referrer,
                 country_code, region, city, device_type, browser, os)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.short_code)
        .bind(event.clicked_at)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.referrer)
        .bind(&event.country_code)
        .bind(&event.region)
        .bind(&event.city)
        .bind(&event.device_type)
        .bind(&event.browser)
        .bind(&event.os)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merge_daily_summary(&self, delta: &DailySummary) -> StoreResult<DailySummary> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT total_clicks, unique_visitors, top_countries, top_referrers, \
             device_breakdown, browser_breakdown, hourly_distribution \
             FROM analytics_daily_summaries WHERE short_code = $1 AND date = $2 FOR UPDATE",
        )
        .bind(&delta.short_code)
        .bind(delta.date)
        .fetch_optional(&mut *tx)
        .await?;

        let mut merged = match existing {
            Some(row) => {
                let top_countries: serde_json::Value = row.try_get("top_countries")?;
                let top_referrers: serde_json::Value = row.try_get("top_referrers")?;
                let device_breakdown: serde_json::Value = row.try_get("device_breakdown")?;
                let browser_breakdown: serde_json::Value = row.try_get("browser_breakdown")?;
                let hourly: serde_json::Value = row.try_get("hourly_distribution")?;

                let mut merged = DailySummary {
                    short_code: delta.short_code.clone(),
                    date: delta.date,
                    total_clicks: row.try_get::<i64, _>("total_clicks")? + delta.total_clicks,
                    unique_visitors: row
                        .try_get::<i64, _>("unique_visitors")?
                        .max(delta.unique_visitors),
                    top_countries: serde_json::from_value(top_countries).unwrap_or_default(),
                    top_referrers: serde_json::from_value(top_referrers).unwrap_or_default(),
                    device_breakdown: serde_json::from_value(device_breakdown).unwrap_or_default(),
                    browser_breakdown: serde_json::from_value(browser_breakdown)
                        .unwrap_or_default(),
                    hourly_distribution: {
                        let mut arr = [0i64; 24];
                        if let Some(values) = hourly.as_array() {
                            for (i, v) in values.iter().enumerate().take(24) {
                                arr[i] = v.as_i64().unwrap_or(0);
                            }
                        }
                        for i in 0..24 {
                            arr[i] += delta.hourly_distribution[i];
                        }
                        arr
                    },
                    peak_hour: 0,
                    avg_clicks_per_hour: 0.0,
                };
                merge_counted(&mut merged.top_countries, &delta.top_countries);
                merge_counted(&mut merged.top_referrers, &delta.top_referrers);
                merge_counted(&mut merged.device_breakdown, &delta.device_breakdown);
                merge_counted(&mut merged.browser_breakdown, &delta.browser_breakdown);
                merged
            }
            None => {
                let mut m = delta.clone();
                m.recompute_derived();
                m
            }
        };
        merged.recompute_derived();

        sqlx::query(
            r#"
            INSERT INTO analytics_daily_summaries
                (short_code, date, total_clicks, unique_visitors, top_countries, top_referrers,
                 device_breakdown, browser_breakdown, hourly_distribution, peak_hour,
                 avg_clicks_per_hour)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (short_code, date) DO UPDATE SET
                total_clicks = $3, unique_visitors = $4, top_countries = $5,
                top_referrers = $6, device_breakdown = $7, browser_breakdown = $8,
                hourly_distribution = $9, peak_hour = $10, avg_clicks_per_hour = $11
            "#,
        )
        .bind(&merged.short_code)
        .bind(merged.date)
        .bind(merged.total_clicks)
        .bind(merged.unique_visitors)
        .bind(serde_json::to_value(&merged.top_countries)?)
        .bind(serde_json::to_value(&merged.top_referrers)?)
        .bind(serde_json::to_value(&merged.device_breakdown)?)
        .bind(serde_json::to_value(&merged.browser_breakdown)?)
        .bind(serde_json::to_value(merged.hourly_distribution.to_vec())?)
        .bind(merged.peak_hour as i16)
        .bind(merged.avg_clicks_per_hour)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(merged)
    }

    async fn get_daily_summary(
        &self,
        short_code: &str,
        date: chrono::NaiveDate,
    ) -> StoreResult<Option<DailySummary>> {
        let row = sqlx::query(
            "SELECT total_clicks, unique_visitors, top_countries, top_referrers, \
             device_breakdown, browser_breakdown, hourly_distribution, peak_hour, \
             avg_clicks_per_hour FROM analytics_daily_summaries WHERE short_code = $1 AND date = $2",
        )
        .bind(short_code)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let hourly: serde_json::Value = row.try_get("hourly_distribution")?;
        let mut hourly_distribution = [0i64; 24];
        if let Some(values) = hourly.as_array() {
            for (i, v) in values.iter().enumerate().take(24) {
                hourly_distribution[i] = v.as_i64().unwrap_or(0);
            }
        }

        Ok(Some(DailySummary {
            short_code: short_code.to_string(),
            date,
            total_clicks: row.try_get("total_clicks")?,
            unique_visitors: row.try_get("unique_visitors")?,
            top_countries: serde_json::from_value(row.try_get("top_countries")?)
                .unwrap_or_default(),
            top_referrers: serde_json::from_value(row.try_get("top_referrers")?)
                .unwrap_or_default(),
            device_breakdown: serde_json::from_value(row.try_get("device_breakdown")?)
                .unwrap_or_default(),
            browser_breakdown: serde_json::from_value(row.try_get("browser_breakdown")?)
                .unwrap_or_default(),
            hourly_distribution,
            peak_hour: row.try_get::<i16, _>("peak_hour")? as u8,
            avg_clicks_per_hour: row.try_get("avg_clicks_per_hour")?,
        }))
    }
}
