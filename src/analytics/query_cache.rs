//! Grounded on `enterprise::analytics::storage`'s keyed-memoization idiom
//! and `enterprise::cache::invalidation::TagInvalidator`'s tag-index
//! structure, adapted from broadcast-based cross-process invalidation to a
//! single-process targeted invalidation by short-code or user-id tag.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use log::warn;
use moka::future::Cache;

const PER_URL_TTL: Duration = Duration::from_secs(5 * 60);
const GLOBAL_TTL: Duration = Duration::from_secs(10 * 60);
const REALTIME_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    PerUrl,
    Global,
    Realtime,
}

impl ReportKind {
    fn ttl(self) -> Duration {
        match self {
            ReportKind::PerUrl => PER_URL_TTL,
            ReportKind::Global => GLOBAL_TTL,
            ReportKind::Realtime => REALTIME_TTL,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ReportKind::PerUrl => "per_url",
            ReportKind::Global => "global",
            ReportKind::Realtime => "realtime",
        }
    }
}

/// Canonical cache key: `(report-type, identifier, sorted-params)`, so
/// parameter order never causes a spurious cache miss.
pub fn cache_key(kind: ReportKind, identifier: &str, params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}:{identifier}?{}", kind.label(), joined.join("&"))
}

/// Memoizes aggregated report values. One [`moka`] cache per report kind
/// so each gets its own TTL; a shared tag index lets an operator drop
/// everything tied to a short-code or user-id in one call.
pub struct AnalyticsQueryCache<V: Clone + Send + Sync + 'static> {
    per_url: Cache<String, V>,
    global: Cache<String, V>,
    realtime: Cache<String, V>,
    tag_index: DashMap<String, HashSet<String>>,
}

impl<V: Clone + Send + Sync + 'static> AnalyticsQueryCache<V> {
    pub fn new() -> Self {
        Self {
            per_url: Cache::builder().time_to_live(PER_URL_TTL).build(),
            global: Cache::builder().time_to_live(GLOBAL_TTL).build(),
            realtime: Cache::builder().time_to_live(REALTIME_TTL).build(),
            tag_index: DashMap::new(),
        }
    }

    fn cache_for(&self, kind: ReportKind) -> &Cache<String, V> {
        match kind {
            ReportKind::PerUrl => &self.per_url,
            ReportKind::Global => &self.global,
            ReportKind::Realtime => &self.realtime,
        }
    }

    /// Returns the cached report if present; otherwise runs `compute`,
    /// stores the result under `key` with the given TTL, and registers it
    /// against every tag so a later [`Self::invalidate_tag`] call can drop
    /// it.
    pub async fn get_or_compute<F, Fut>(&self, kind: ReportKind, key: String, tags: &[String], compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cache = self.cache_for(kind);
        if let Some(value) = cache.get(&key).await {
            return value;
        }

        let value = compute().await;
        cache.insert(key.clone(), value.clone()).await;

        let composite = format!("{}\u{1}{key}", kind.label());
        for tag in tags {
            self.tag_index.entry(tag.clone()).or_default().insert(composite.clone());
        }
        value
    }

    /// Drops every cached report tagged with `tag` (a short-code or
    /// user-id). A tag with no entries is a harmless no-op.
    pub async fn invalidate_tag(&self, tag: &str) {
        let Some((_, composites)) = self.tag_index.remove(tag) else {
            return;
        };
        for composite in composites {
            let Some((label, key)) = composite.split_once('\u{1}') else {
                warn!("malformed analytics cache tag entry: {composite}");
                continue;
            };
            match label {
                "per_url" => self.per_url.invalidate(key).await,
                "global" => self.global.invalidate(key).await,
                "realtime" => self.realtime.invalidate(key).await,
                other => warn!("unknown report kind in tag index: {other}"),
            }
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for AnalyticsQueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn cache_key_is_insensitive_to_parameter_order() {
        let a = cache_key(ReportKind::PerUrl, "abc1234", &[("start", "2024-01-01"), ("end", "2024-01-31")]);
        let b = cache_key(ReportKind::PerUrl, "abc1234", &[("end", "2024-01-31"), ("start", "2024-01-01")]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn repeated_calls_for_the_same_key_hit_the_cache() {
        let cache: AnalyticsQueryCache<u64> = AnalyticsQueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            cache
                .get_or_compute(ReportKind::PerUrl, "abc1234:report".to_string(), &["abc1234".to_string()], move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    42
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidating_a_tag_forces_recomputation() {
        let cache: AnalyticsQueryCache<u64> = AnalyticsQueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = "abc1234:report".to_string();

        let compute = |calls: Arc<AtomicUsize>| {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                7u64
            }
        };

        cache.get_or_compute(ReportKind::PerUrl, key.clone(), &["abc1234".to_string()], compute(calls.clone())).await;
        cache.invalidate_tag("abc1234").await;
        cache.get_or_compute(ReportKind::PerUrl, key, &["abc1234".to_string()], compute(calls.clone())).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_report_kinds_do_not_collide_on_the_same_key_text() {
        let cache: AnalyticsQueryCache<&'static str> = AnalyticsQueryCache::new();
        cache.get_or_compute(ReportKind::PerUrl, "k".to_string(), &[], || async { "per-url" }).await;
        let global = cache.get_or_compute(ReportKind::Global, "k".to_string(), &[], || async { "global" }).await;
        assert_eq!(global, "global");
    }
}
