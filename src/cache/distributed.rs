//! Distributed cache adapter (component F), backed by Redis.
//!
//! Grounded on `enterprise::cache::codec`'s serialize-with-version idiom
//! (swapped here for canonical JSON) and
//! `enterprise::ratelimit::distributed::RedisConfig`'s connection shape.
//! Every public method swallows its own errors: cache failures must never
//! propagate into the request path, so each one logs and returns a
//! best-effort default instead of `Result`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::store::UrlMapping;

fn url_key(code: &str) -> String {
    format!("url:{code}")
}

fn expired_key(code: &str) -> String {
    format!("expired:{code}")
}

/// F's contract, so [`super::lookup::MultiLayerLookup`] can be exercised in
/// tests against an in-memory double instead of a live Redis instance.
/// Every method swallows its own errors: a cache failure must never
/// propagate into the request path.
#[async_trait]
pub trait DistributedCacheLayer: Send + Sync {
    async fn cache(&self, mapping: &UrlMapping, ttl: Option<Duration>) -> bool;
    async fn get(&self, code: &str) -> Option<UrlMapping>;
    async fn remove(&self, code: &str);
    async fn batch_cache(&self, mappings: &[UrlMapping]);
    async fn mark_expired(&self, code: &str);
    async fn is_marked_expired(&self, code: &str) -> bool;
}

/// Key-value cache in front of the authoritative store, keyed by short
/// code. See [`super::lookup::MultiLayerLookup`] for how this composes with
/// the process-local LRU.
pub struct DistributedCache {
    conn: ConnectionManager,
    default_ttl: Duration,
    expired_marker_ttl: Duration,
    min_remaining: Duration,
}

impl DistributedCache {
    pub fn new(
        conn: ConnectionManager,
        default_ttl: Duration,
        expired_marker_ttl: Duration,
        min_remaining: Duration,
    ) -> Self {
        Self {
            conn,
            default_ttl,
            expired_marker_ttl,
            min_remaining,
        }
    }

    pub async fn connect(
        config: &crate::config::DistributedCacheConfig,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(
            conn,
            Duration::from_secs(config.default_ttl_secs),
            Duration::from_secs(config.expired_marker_ttl_secs),
            Duration::from_secs(config.min_remaining_secs),
        ))
    }

}

#[async_trait]
impl DistributedCacheLayer for DistributedCache {
    /// Cache `mapping` with a TTL of `ttl` if given, else
    /// `min(default_ttl, expires_at - now)`. When the TTL is computed
    /// rather than caller-supplied, skips caching entirely if the
    /// remaining lifetime is at or below `min_remaining` (not worth the
    /// round trip for an entry that's about to expire anyway). An
    /// explicit `ttl` is always honored. Returns whether the value was
    /// actually written.
    async fn cache(&self, mapping: &UrlMapping, ttl: Option<Duration>) -> bool {
        let effective_ttl = match ttl {
            Some(t) => t,
            None => {
                let bound = mapping
                    .expires_at
                    .map(|e| (e - Utc::now()).num_seconds().max(0) as u64)
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_ttl);
                let computed = self.default_ttl.min(bound);
                if computed <= self.min_remaining {
                    return false;
                }
                computed
            }
        };

        let payload = match serde_json::to_string(mapping) {
            Ok(p) => p,
            Err(e) => {
                warn!("failed to serialize mapping {}: {e}", mapping.short_code);
                return false;
            }
        };

        let mut conn = self.conn.clone();
        match conn
            .set_ex::<_, _, ()>(url_key(&mapping.short_code), payload, effective_ttl.as_secs())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("distributed cache write failed for {}: {e}", mapping.short_code);
                false
            }
        }
    }

    /// Fetch and deserialize a mapping, treating an already-expired stored
    /// value as a miss (and removing it).
    async fn get(&self, code: &str) -> Option<UrlMapping> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = match conn.get(url_key(code)).await {
            Ok(v) => v,
            Err(e) => {
                warn!("distributed cache read failed for {code}: {e}");
                return None;
            }
        };
        let raw = raw?;

        let mapping: UrlMapping = match serde_json::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                warn!("corrupt cache entry for {code}: {e}");
                return None;
            }
        };

        if mapping.is_expired_at(Utc::now()) {
            self.remove(code).await;
            return None;
        }
        Some(mapping)
    }

    async fn remove(&self, code: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(url_key(code)).await {
            warn!("distributed cache delete failed for {code}: {e}");
        }
    }

    async fn batch_cache(&self, mappings: &[UrlMapping]) {
        for mapping in mappings {
            self.cache(mapping, None).await;
        }
    }

    /// Write a negative marker so repeated lookups of a known-expired code
    /// short-circuit without hitting the store.
    async fn mark_expired(&self, code: &str) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(expired_key(code), "1", self.expired_marker_ttl.as_secs())
            .await
        {
            warn!("failed to write expired marker for {code}: {e}");
        }
    }

    async fn is_marked_expired(&self, code: &str) -> bool {
        let mut conn = self.conn.clone();
        match conn.exists(expired_key(code)).await {
            Ok(v) => v,
            Err(e) => {
                warn!("expired-marker probe failed for {code}: {e}");
                false
            }
        }
    }
}
