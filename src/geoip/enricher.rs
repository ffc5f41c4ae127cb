//! Grounded on `enterprise::ratelimit::algorithm::LeakyBucket`'s
//! elapsed-time-based draining for the minimum inter-request delay, and
//! `enterprise::cache::tier::LruCache` for the bounded, TTL-checked result
//! cache (here backed by the `lru` crate directly, as in [`crate::cache::local`]).

use std::collections::HashSet;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

const DEFAULT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MIN_INTER_REQUEST_DELAY: Duration = Duration::from_millis(1_400);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLocation {
    pub country_code: String,
    pub region: String,
    pub city: String,
}

impl GeoLocation {
    pub fn unknown() -> Self {
        Self {
            country_code: "XX".to_string(),
            region: "unknown".to_string(),
            city: "unknown".to_string(),
        }
    }
}

impl Default for GeoLocation {
    fn default() -> Self {
        Self::unknown()
    }
}

/// External lookup service. A real deployment calls a geolocation API;
/// tests supply a fixed-response double.
#[async_trait]
pub trait GeoIpProvider: Send + Sync {
    async fn resolve(&self, ip: &str) -> Option<GeoLocation>;
}

#[derive(serde::Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
}

/// Resolves against an `ip-api.com`-shaped JSON endpoint (`GET
/// {base_url}/json/{ip}`). Any transport error or a non-`success` status
/// is treated as a miss; the caller falls back to [`GeoLocation::unknown`].
pub struct HttpGeoIpProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGeoIpProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl GeoIpProvider for HttpGeoIpProvider {
    async fn resolve(&self, ip: &str) -> Option<GeoLocation> {
        let url = format!("{}/json/{ip}", self.base_url.trim_end_matches('/'));
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("geoip http request failed for {ip}: {e}");
                return None;
            }
        };
        let body: IpApiResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                warn!("geoip response for {ip} was not valid json: {e}");
                return None;
            }
        };
        if body.status != "success" {
            return None;
        }
        Some(GeoLocation {
            country_code: body.country_code.unwrap_or_else(|| "XX".to_string()),
            region: body.region.unwrap_or_else(|| "unknown".to_string()),
            city: body.city.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

struct CacheEntry {
    location: GeoLocation,
    cached_at: Instant,
}

fn is_public(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            !(v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() || v4.is_broadcast())
        }
        Ok(IpAddr::V6(v6)) => !(v6.is_loopback() || v6.is_unspecified() || v6.is_unique_local()),
        Err(_) => false,
    }
}

/// Queues external lookups behind a minimum inter-request delay so a
/// burst of redirects never exceeds the provider's rate cap.
pub struct GeoIpEnricher<P> {
    provider: Arc<P>,
    cache: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    min_inter_request_delay: Duration,
    pending: Mutex<HashSet<String>>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: AsyncMutex<mpsc::UnboundedReceiver<String>>,
}

impl<P: GeoIpProvider + 'static> GeoIpEnricher<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self::with_settings(provider, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, DEFAULT_MIN_INTER_REQUEST_DELAY)
    }

    pub fn with_settings(provider: Arc<P>, cache_capacity: usize, ttl: Duration, min_inter_request_delay: Duration) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            provider,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(cache_capacity.max(1)).unwrap())),
            ttl,
            min_inter_request_delay,
            pending: Mutex::new(HashSet::new()),
            queue_tx,
            queue_rx: AsyncMutex::new(queue_rx),
        }
    }

    fn cached(&self, ip: &str) -> Option<GeoLocation> {
        let mut cache = self.cache.lock();
        let entry = cache.get(ip)?;
        if entry.cached_at.elapsed() > self.ttl {
            cache.pop(ip);
            return None;
        }
        Some(entry.location.clone())
    }

    fn store(&self, ip: &str, location: GeoLocation) {
        self.cache.lock().put(
            ip.to_string(),
            CacheEntry {
                location,
                cached_at: Instant::now(),
            },
        );
    }

    /// Returns the cached value or [`GeoLocation::unknown`] immediately.
    /// On a cache miss for a public IP, enqueues a background resolution
    /// so a later call sees the result.
    pub fn lookup(&self, ip: &str) -> GeoLocation {
        if !is_public(ip) {
            return GeoLocation::unknown();
        }
        if let Some(location) = self.cached(ip) {
            return location;
        }

        let mut pending = self.pending.lock();
        if pending.insert(ip.to_string()) {
            drop(pending);
            if self.queue_tx.send(ip.to_string()).is_err() {
                warn!("geoip enrichment queue closed, dropping lookup for {ip}");
            }
        }
        GeoLocation::unknown()
    }

    /// Same contract as [`Self::lookup`], but races the external provider
    /// against `timeout` instead of only queuing for later.
    pub async fn lookup_sync(&self, ip: &str, timeout: Duration) -> GeoLocation {
        if !is_public(ip) {
            return GeoLocation::unknown();
        }
        if let Some(location) = self.cached(ip) {
            return location;
        }

        match tokio::time::timeout(timeout, self.provider.resolve(ip)).await {
            Ok(Some(location)) => {
                self.store(ip, location.clone());
                location
            }
            Ok(None) | Err(_) => GeoLocation::unknown(),
        }
    }

    /// Drains the queue one entry at a time, sleeping at least
    /// `min_inter_request_delay` between external calls.
    pub fn spawn_drain_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut receiver = self.queue_rx.lock().await;
            while let Some(ip) = receiver.recv().await {
                self.pending.lock().remove(&ip);
                if self.cached(&ip).is_none() {
                    match self.provider.resolve(&ip).await {
                        Some(location) => {
                            debug!("geoip resolved {ip} -> {}", location.country_code);
                            self.store(&ip, location);
                        }
                        None => debug!("geoip lookup failed for {ip}"),
                    }
                }
                tokio::time::sleep(self.min_inter_request_delay).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeoIpProvider for FixedProvider {
        async fn resolve(&self, _ip: &str) -> Option<GeoLocation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(GeoLocation {
                country_code: "US".to_string(),
                region: "CA".to_string(),
                city: "San Francisco".to_string(),
            })
        }
    }

    #[test]
    fn private_and_loopback_addresses_short_circuit_to_unknown() {
        assert!(!is_public("127.0.0.1"));
        assert!(!is_public("10.0.0.5"));
        assert!(!is_public("192.168.1.1"));
        assert!(is_public("8.8.8.8"));
    }

    #[tokio::test]
    async fn lookup_returns_unknown_immediately_and_queues_resolution() {
        let provider = Arc::new(FixedProvider { calls: AtomicUsize::new(0) });
        let enricher = Arc::new(GeoIpEnricher::with_settings(
            provider,
            100,
            Duration::from_secs(60),
            Duration::from_millis(1),
        ));

        let first = enricher.lookup("8.8.8.8");
        assert_eq!(first, GeoLocation::unknown());

        let _drain = enricher.clone().spawn_drain_loop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = enricher.lookup("8.8.8.8");
        assert_eq!(second.country_code, "US");
    }

    #[tokio::test]
    async fn lookup_sync_races_the_provider_against_a_timeout() {
        let provider = Arc::new(FixedProvider { calls: AtomicUsize::new(0) });
        let enricher = GeoIpEnricher::with_settings(provider, 100, Duration::from_secs(60), Duration::from_millis(1));

        let location = enricher.lookup_sync("1.2.3.4", Duration::from_secs(1)).await;
        assert_eq!(location.country_code, "US");
    }

    #[tokio::test]
    async fn private_ip_never_reaches_the_provider() {
        let provider = Arc::new(FixedProvider { calls: AtomicUsize::new(0) });
        let enricher = GeoIpEnricher::with_settings(provider.clone(), 100, Duration::from_secs(60), Duration::from_millis(1));

        let location = enricher.lookup_sync("192.168.0.1", Duration::from_millis(50)).await;
        assert_eq!(location, GeoLocation::unknown());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
