//! In-memory store implementation, used by integration tests and anywhere
//! a live Postgres instance isn't available. Grounded on the teacher's
//! `enterprise::cache::strategy::InMemoryStore` (a `DashMap`-backed stand-in
//! for a real `BackingStore`).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{
    merge_counted, AnalyticsEvent, AnalyticsRepository, CounterRepository, DailySummary,
    MappingRepository, NewMapping, StoreError, StoreResult, UrlMapping,
};

/// A single in-process store standing in for Postgres in tests. Shared via
/// `Arc` across the components under test the same way a `PgPool` would be.
#[derive(Clone, Default)]
pub struct MemoryStore {
    mappings: Arc<DashMap<String, UrlMapping>>,
    counter: Arc<Mutex<Option<i64>>>,
    events: Arc<DashMap<String, AnalyticsEvent>>,
    summaries: Arc<DashMap<(String, NaiveDate), DailySummary>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MappingRepository for MemoryStore {
    async fn insert(&self, mapping: NewMapping) -> StoreResult<UrlMapping> {
        if self.mappings.contains_key(&mapping.short_code) {
            return Err(StoreError::Conflict(mapping.short_code));
        }
        let row = UrlMapping {
            short_code: mapping.short_code.clone(),
            long_url: mapping.long_url,
            long_url_hash: mapping.long_url_hash,
            created_at: Utc::now(),
            expires_at: mapping.expires_at,
            user_id: mapping.user_id,
            is_custom_alias: mapping.is_custom_alias,
            is_deleted: false,
            deleted_at: None,
            last_accessed_at: None,
            access_count: 0,
        };
        self.mappings.insert(mapping.short_code, row.clone());
        Ok(row)
    }

    async fn find_by_code(&self, short_code: &str) -> StoreResult<Option<UrlMapping>> {
        Ok(self.mappings.get(short_code).map(|r| r.clone()))
    }

    async fn alias_exists(&self, short_code: &str) -> StoreResult<bool> {
        Ok(self.mappings.contains_key(short_code))
    }

    async fn record_access(&self, short_code: &str, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(mut row) = self.mappings.get_mut(short_code) {
            row.last_accessed_at = Some(at);
            row.access_count += 1;
        }
        Ok(())
    }

    async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<UrlMapping>> {
        let mut rows: Vec<UrlMapping> = self
            .mappings
            .iter()
            .map(|e| e.clone())
            .filter(|m| !m.is_deleted && m.is_expired_at(now))
            .collect();
        rows.sort_by_key(|m| m.expires_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn soft_delete_batch(
        &self,
        short_codes: &[String],
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut affected = 0;
        for code in short_codes {
            if let Some(mut row) = self.mappings.get_mut(code) {
                if !row.is_deleted {
                    row.is_deleted = true;
                    row.deleted_at = Some(at);
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn find_hard_deletable(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<UrlMapping>> {
        let mut rows: Vec<UrlMapping> = self
            .mappings
            .iter()
            .map(|e| e.clone())
            .filter(|m| m.is_deleted && m.deleted_at.map(|d| d < cutoff).unwrap_or(false))
            .collect();
        rows.sort_by_key(|m| m.deleted_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn hard_delete_batch(&self, short_codes: &[String]) -> StoreResult<u64> {
        let mut affected = 0;
        for code in short_codes {
            if self.mappings.remove(code).is_some() {
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn hottest(&self, top_n: i64) -> StoreResult<Vec<UrlMapping>> {
        let mut rows: Vec<UrlMapping> = self
            .mappings
            .iter()
            .map(|e| e.clone())
            .filter(|m| !m.is_deleted)
            .collect();
        rows.sort_by_key(|m| std::cmp::Reverse(m.access_count));
        rows.truncate(top_n.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl CounterRepository for MemoryStore {
    async fn reserve_range(&self, seed: i64, range_size: i64) -> StoreResult<i64> {
        let mut guard = self.counter.lock();
        let new_start = guard.unwrap_or(seed);
        *guard = Some(new_start + range_size);
        Ok(new_start)
    }
}

#[async_trait]
impl AnalyticsRepository for MemoryStore {
    async fn insert_event(&self, event: &AnalyticsEvent) -> StoreResult<()> {
        self.events
            .entry(event.event_id.clone())
            .or_insert_with(|| event.clone());
        Ok(())
    }

    async fn merge_daily_summary(&self, delta: &DailySummary) -> StoreResult<DailySummary> {
        let key = (delta.short_code.clone(), delta.date);
        let mut entry = self
            .summaries
            .entry(key)
            .or_insert_with(|| DailySummary::empty(delta.short_code.clone(), delta.date));

        entry.total_clicks += delta.total_clicks;
        entry.unique_visitors = entry.unique_visitors.max(delta.unique_visitors);
        for i in 0..24 {
            entry.hourly_distribution[i] += delta.hourly_distribution[i];
        }
        merge_counted(&mut entry.top_countries, &delta.top_countries);
        merge_counted(&mut entry.top_referrers, &delta.top_referrers);
        merge_counted(&mut entry.device_breakdown, &delta.device_breakdown);
        merge_counted(&mut entry.browser_breakdown, &delta.browser_breakdown);
        entry.recompute_derived();

        Ok(entry.clone())
    }

    async fn get_daily_summary(
        &self,
        short_code: &str,
        date: NaiveDate,
    ) -> StoreResult<Option<DailySummary>> {
        Ok(self
            .summaries
            .get(&(short_code.to_string(), date))
            .map(|e| e.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_reservations_are_disjoint() {
        let store = MemoryStore::new();
        let first = store.reserve_range(1_000_000, 10_000).await.unwrap();
        let second = store.reserve_range(1_000_000, 10_000).await.unwrap();
        assert_eq!(first, 1_000_000);
        assert_eq!(second, 1_010_000);
    }

    #[tokio::test]
    async fn double_soft_delete_is_a_no_op_on_second_call() {
        let store = MemoryStore::new();
        store
            .insert(NewMapping {
                short_code: "abc1234".to_string(),
                long_url: "https://example.com".to_string(),
                long_url_hash: "hash".to_string(),
                expires_at: None,
                user_id: None,
                is_custom_alias: false,
            })
            .await
            .unwrap();

        let codes = vec!["abc1234".to_string()];
        let now = Utc::now();
        let first = store.soft_delete_batch(&codes, now).await.unwrap();
        let second = store.soft_delete_batch(&codes, now).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn merging_the_same_window_twice_is_additive_not_duplicated_by_key() {
        let store = MemoryStore::new();
        let date = Utc::now().date_naive();
        let mut delta = DailySummary::empty("abc1234".to_string(), date);
        delta.total_clicks = 3;
        delta.unique_visitors = 2;
        delta.hourly_distribution[10] = 3;

        let merged = store.merge_daily_summary(&delta).await.unwrap();
        assert_eq!(merged.total_clicks, 3);
        assert_eq!(merged.unique_visitors, 2);
        assert_eq!(merged.peak_hour, 10);
    }
}
