//! Aggregation consumer (component I).
//!
//! Grounded on `enterprise::analytics::aggregator`'s `TimeWindow` idiom for
//! the bucket boundary math and `enterprise::analytics::storage`'s
//! upsert-on-flush pattern for turning a window into a daily summary delta.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{info, warn};
use parking_lot::Mutex;

use crate::store::{AnalyticsRepository, CountedDimension, DailySummary};

use super::bus::ClickBus;
use super::model::ClickEvent;

/// Derive a referrer's domain, falling back to `"unknown"` on anything that
/// doesn't look like `scheme://host/...`.
fn referrer_domain(referrer: &str) -> String {
    let without_scheme = referrer.split("://").nth(1).unwrap_or(referrer);
    let host = without_scheme.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        "unknown".to_string()
    } else {
        host.to_string()
    }
}

fn window_start(timestamp: DateTime<Utc>, window_size: Duration) -> DateTime<Utc> {
    let size_secs = window_size.as_secs().max(1) as i64;
    let epoch_secs = timestamp.timestamp();
    let floored = (epoch_secs / size_secs) * size_secs;
    Utc.timestamp_opt(floored, 0).single().unwrap_or(timestamp)
}

struct Window {
    click_count: i64,
    unique_ips: HashSet<String>,
    referrers: HashMap<String, i64>,
    countries: HashMap<String, i64>,
    devices: HashMap<String, i64>,
    browsers: HashMap<String, i64>,
}

impl Window {
    fn new() -> Self {
        Self {
            click_count: 0,
            unique_ips: HashSet::new(),
            referrers: HashMap::new(),
            countries: HashMap::new(),
            devices: HashMap::new(),
            browsers: HashMap::new(),
        }
    }

    fn ingest(&mut self, event: &ClickEvent) {
        self.click_count += 1;
        if let Some(ip) = &event.ip_address {
            self.unique_ips.insert(ip.clone());
        }
        if let Some(referrer) = &event.referrer {
            *self.referrers.entry(referrer_domain(referrer)).or_insert(0) += 1;
        }
        if let Some(country) = &event.country_code {
            *self.countries.entry(country.clone()).or_insert(0) += 1;
        }
        if let Some(device) = &event.device_type {
            *self.devices.entry(device.clone()).or_insert(0) += 1;
        }
        if let Some(browser) = &event.browser {
            *self.browsers.entry(browser.clone()).or_insert(0) += 1;
        }
    }

    fn into_delta(&self, short_code: String, window_start: DateTime<Utc>) -> DailySummary {
        let mut delta = DailySummary::empty(short_code, window_start.date_naive());
        delta.total_clicks = self.click_count;
        delta.unique_visitors = self.unique_ips.len() as i64;
        delta.hourly_distribution[window_start.hour() as usize] = self.click_count;
        delta.top_countries = counted(self.countries.clone());
        delta.top_referrers = counted(self.referrers.clone());
        delta.device_breakdown = counted(self.devices.clone());
        delta.browser_breakdown = counted(self.browsers.clone());
        delta.recompute_derived();
        delta
    }
}

fn counted(map: HashMap<String, i64>) -> Vec<CountedDimension> {
    let mut v: Vec<CountedDimension> = map
        .into_iter()
        .map(|(name, clicks)| CountedDimension { name, clicks })
        .collect();
    v.sort_by(|a, b| b.clicks.cmp(&a.clicks));
    v
}

use chrono::Timelike;

/// Consumes click events off the bus and rolls them into fixed-size
/// windows, flushing each one into the daily summary store once it has
/// aged past the late-arrival grace period.
pub struct AggregationConsumer<A: AnalyticsRepository> {
    bus: Arc<dyn ClickBus>,
    store: Arc<A>,
    windows: Mutex<HashMap<(String, DateTime<Utc>), Window>>,
    window_size: Duration,
    late_grace: Duration,
}

impl<A: AnalyticsRepository + 'static> AggregationConsumer<A> {
    pub fn new(bus: Arc<dyn ClickBus>, store: Arc<A>, window_size: Duration, late_grace: Duration) -> Self {
        Self {
            bus,
            store,
            windows: Mutex::new(HashMap::new()),
            window_size,
            late_grace,
        }
    }

    /// Poll the bus once and, if a message arrived, fold it into its
    /// window. Returns whether an event was processed.
    pub async fn consume_one(&self, poll_timeout: Duration) -> bool {
        let message = match self.bus.poll(poll_timeout).await {
            Some(m) => m,
            None => return false,
        };
        let event: ClickEvent = match serde_json::from_slice(&message.payload) {
            Ok(e) => e,
            Err(e) => {
                warn!("dropping malformed click event: {e}");
                return true;
            }
        };
        self.ingest(event);
        true
    }

    fn ingest(&self, event: ClickEvent) {
        let start = window_start(event.timestamp, self.window_size);
        let mut windows = self.windows.lock();
        windows
            .entry((event.short_code.clone(), start))
            .or_insert_with(Window::new)
            .ingest(&event);
    }

    /// Flush every window whose end has aged past the late-arrival grace
    /// period, merging its delta into the daily summary store. A failed
    /// merge leaves the window in place so the next run retries it; other
    /// windows in the same call are unaffected.
    pub async fn flush_due_windows(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<(String, DateTime<Utc>)> = {
            let windows = self.windows.lock();
            windows
                .keys()
                .filter(|(_, start)| {
                    let window_end = *start + chrono::Duration::from_std(self.window_size).unwrap_or_default();
                    (now - window_end).to_std().map(|age| age > self.late_grace).unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        let mut flushed = 0;
        for key in due {
            let window = {
                let mut windows = self.windows.lock();
                windows.remove(&key)
            };
            let Some(window) = window else { continue };
            let (code, start) = key.clone();
            let delta = window.into_delta(code.clone(), start);

            match self.store.merge_daily_summary(&delta).await {
                Ok(_) => flushed += 1,
                Err(e) => {
                    warn!("failed to flush window {code}@{start}: {e}, retaining for retry");
                    let mut windows = self.windows.lock();
                    windows.insert(key, window);
                }
            }
        }
        flushed
    }

    pub fn active_window_count(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn spawn_consume_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("aggregation consumer starting");
            loop {
                self.consume_one(Duration::from_millis(500)).await;
            }
        })
    }

    pub fn spawn_flush_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let flushed = self.flush_due_windows(Utc::now()).await;
                if flushed > 0 {
                    info!("flushed {flushed} aggregation windows");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::bus::{BusMessage, InMemoryClickBus, MessageHeaders};
    use crate::store::memory::MemoryStore;

    fn consumer() -> (Arc<InMemoryClickBus>, Arc<AggregationConsumer<MemoryStore>>) {
        let bus = Arc::new(InMemoryClickBus::new());
        let store = Arc::new(MemoryStore::new());
        let consumer = Arc::new(AggregationConsumer::new(
            bus.clone(),
            store,
            Duration::from_secs(300),
            Duration::from_secs(60),
        ));
        (bus, consumer)
    }

    struct FailOnceStore {
        inner: MemoryStore,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl crate::store::AnalyticsRepository for FailOnceStore {
        async fn insert_event(&self, event: &crate::store::AnalyticsEvent) -> crate::store::StoreResult<()> {
            self.inner.insert_event(event).await
        }

        async fn merge_daily_summary(&self, delta: &DailySummary) -> crate::store::StoreResult<DailySummary> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::store::StoreError::Pool("simulated outage".to_string()));
            }
            self.inner.merge_daily_summary(delta).await
        }

        async fn get_daily_summary(
            &self,
            short_code: &str,
            date: chrono::NaiveDate,
        ) -> crate::store::StoreResult<Option<DailySummary>> {
            self.inner.get_daily_summary(short_code, date).await
        }
    }

    async fn send(bus: &InMemoryClickBus, event: &ClickEvent) {
        bus.produce(BusMessage {
            partition_key: event.short_code.clone(),
            payload: serde_json::to_vec(event).unwrap(),
            headers: MessageHeaders {
                event_type: "click".to_string(),
                version: "1.0".to_string(),
                event_id: event.event_id.clone(),
            },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn same_window_events_accumulate_into_one_bucket() {
        let (bus, consumer) = consumer();
        let base = Utc::now();

        for i in 0..3 {
            let mut event = ClickEvent::new("abc1234".to_string());
            event.timestamp = base;
            event.ip_address = Some(format!("10.0.0.{i}"));
            send(&bus, &event).await;
        }

        for _ in 0..3 {
            assert!(consumer.consume_one(Duration::from_millis(50)).await);
        }

        assert_eq!(consumer.active_window_count(), 1);
    }

    #[tokio::test]
    async fn referrer_without_a_parseable_domain_falls_back_to_unknown() {
        assert_eq!(referrer_domain("not-a-url"), "unknown");
        assert_eq!(referrer_domain("https://news.example.com/story"), "news.example.com");
    }

    #[tokio::test]
    async fn flushing_merges_into_the_daily_summary_and_drops_the_window() {
        let (bus, consumer) = consumer();
        let mut event = ClickEvent::new("abc1234".to_string());
        event.timestamp = Utc::now() - chrono::Duration::minutes(10);
        send(&bus, &event).await;
        consumer.consume_one(Duration::from_millis(50)).await;
        assert_eq!(consumer.active_window_count(), 1);

        let flushed = consumer.flush_due_windows(Utc::now()).await;
        assert_eq!(flushed, 1);
        assert_eq!(consumer.active_window_count(), 0);

        let summary = consumer
            .store
            .get_daily_summary("abc1234", event.timestamp.date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.total_clicks, 1);
    }

    #[tokio::test]
    async fn a_failed_merge_retains_the_accumulated_window_for_the_next_retry() {
        let bus = Arc::new(InMemoryClickBus::new());
        let store = Arc::new(FailOnceStore {
            inner: MemoryStore::new(),
            fail_next: std::sync::atomic::AtomicBool::new(true),
        });
        let consumer = Arc::new(AggregationConsumer::new(bus.clone(), store, Duration::from_secs(300), Duration::from_secs(60)));

        let mut event = ClickEvent::new("abc1234".to_string());
        event.timestamp = Utc::now() - chrono::Duration::minutes(10);
        event.ip_address = Some("10.0.0.1".to_string());
        send(&bus, &event).await;
        consumer.consume_one(Duration::from_millis(50)).await;

        let flushed = consumer.flush_due_windows(Utc::now()).await;
        assert_eq!(flushed, 0);
        assert_eq!(consumer.active_window_count(), 1, "window must survive a failed flush");

        let flushed = consumer.flush_due_windows(Utc::now()).await;
        assert_eq!(flushed, 1, "the retained window's data must still be there on retry");
        assert_eq!(consumer.active_window_count(), 0);

        let summary = consumer
            .store
            .get_daily_summary("abc1234", event.timestamp.date_naive())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.total_clicks, 1);
        assert_eq!(summary.unique_visitors, 1);
    }
}
