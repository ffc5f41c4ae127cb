//! End-to-end scenarios spanning minting, the multi-layer cache, click
//! aggregation, and expiry, exercised against the in-memory store and
//! distributed-cache doubles so no live Postgres/Redis/Kafka is needed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use shortlink_core::cache::{LocalCache, MemoryDistributedCache, MultiLayerLookup};
use shortlink_core::config::{CircuitBreakerConfig, HashFallbackConfig};
use shortlink_core::events::{AggregationConsumer, BusMessage, ClickBus, ClickEvent, InMemoryClickBus, MessageHeaders};
use shortlink_core::expiry::{ExpiryManager, SweepConfig};
use shortlink_core::id::{CircuitState, IdService, MintSource};
use shortlink_core::store::memory::MemoryStore;
use shortlink_core::store::{AnalyticsRepository, MappingRepository, NewMapping};

fn hash_config() -> HashFallbackConfig {
    HashFallbackConfig {
        algo: shortlink_core::id::hashfallback::HashAlgo::Md5,
        min_len: 7,
        max_retries: 3,
        salt: "test-salt".to_string(),
    }
}

fn breaker_config(threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: threshold,
        probe_interval_secs: 60,
    }
}

struct FailingCounterStore(Arc<MemoryStore>);

#[async_trait::async_trait]
impl shortlink_core::store::MappingRepository for FailingCounterStore {
    async fn insert(&self, mapping: NewMapping) -> shortlink_core::store::StoreResult<shortlink_core::store::UrlMapping> {
        self.0.insert(mapping).await
    }
    async fn find_by_code(&self, short_code: &str) -> shortlink_core::store::StoreResult<Option<shortlink_core::store::UrlMapping>> {
        self.0.find_by_code(short_code).await
    }
    async fn alias_exists(&self, short_code: &str) -> shortlink_core::store::StoreResult<bool> {
        self.0.alias_exists(short_code).await
    }
    async fn record_access(&self, short_code: &str, at: chrono::DateTime<Utc>) -> shortlink_core::store::StoreResult<()> {
        self.0.record_access(short_code, at).await
    }
    async fn find_expirable(&self, now: chrono::DateTime<Utc>, limit: i64) -> shortlink_core::store::StoreResult<Vec<shortlink_core::store::UrlMapping>> {
        self.0.find_expirable(now, limit).await
    }
    async fn soft_delete_batch(&self, short_codes: &[String], at: chrono::DateTime<Utc>) -> shortlink_core::store::StoreResult<u64> {
        self.0.soft_delete_batch(short_codes, at).await
    }
    async fn find_hard_deletable(&self, cutoff: chrono::DateTime<Utc>, limit: i64) -> shortlink_core::store::StoreResult<Vec<shortlink_core::store::UrlMapping>> {
        self.0.find_hard_deletable(cutoff, limit).await
    }
    async fn hard_delete_batch(&self, short_codes: &[String]) -> shortlink_core::store::StoreResult<u64> {
        self.0.hard_delete_batch(short_codes).await
    }
    async fn hottest(&self, top_n: i64) -> shortlink_core::store::StoreResult<Vec<shortlink_core::store::UrlMapping>> {
        self.0.hottest(top_n).await
    }
}

#[async_trait::async_trait]
impl shortlink_core::store::CounterRepository for FailingCounterStore {
    async fn reserve_range(&self, _seed: i64, _range_size: i64) -> shortlink_core::store::StoreResult<i64> {
        Err(shortlink_core::store::StoreError::Pool("simulated outage".to_string()))
    }
}

#[tokio::test]
async fn mint_then_lookup_progresses_through_store_memory_and_distributed_sources() {
    let store = Arc::new(MemoryStore::new());
    let service = IdService::new(store.clone(), 1_000_000, 10_000, &hash_config(), &breaker_config(3), 7);
    let local = Arc::new(LocalCache::new(100));
    let distributed = Arc::new(MemoryDistributedCache::default());
    let lookup = MultiLayerLookup::new(local.clone(), distributed.clone(), store.clone());

    let outcome = service.mint_code("https://example.com/x").await.unwrap();
    assert_eq!(outcome.source, MintSource::Counter);

    store
        .insert(NewMapping {
            short_code: outcome.short_code.clone(),
            long_url: "https://example.com/x".to_string(),
            long_url_hash: "hash".to_string(),
            expires_at: None,
            user_id: None,
            is_custom_alias: false,
        })
        .await
        .unwrap();

    let (_, source) = lookup.lookup(&outcome.short_code).await.unwrap();
    assert_eq!(source, shortlink_core::cache::LookupSource::Store);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let (_, source) = lookup.lookup(&outcome.short_code).await.unwrap();
    assert_eq!(source, shortlink_core::cache::LookupSource::Memory);

    local.delete(&outcome.short_code);
    let (_, source) = lookup.lookup(&outcome.short_code).await.unwrap();
    assert_eq!(source, shortlink_core::cache::LookupSource::Distributed);
}

#[tokio::test]
async fn custom_alias_rejects_reserved_words_then_conflicts_on_reuse() {
    let store = Arc::new(MemoryStore::new());
    let service = IdService::new(store, 1_000_000, 10_000, &hash_config(), &breaker_config(3), 7);

    let err = service.mint_with_alias("go").await.unwrap_err();
    assert!(matches!(err, shortlink_core::id::IdError::AliasReserved(_)));

    let outcome = service.mint_with_alias("promo").await.unwrap();
    assert_eq!(outcome.short_code, "promo");

    let err = service.mint_with_alias("promo").await.unwrap_err();
    assert!(matches!(err, shortlink_core::id::IdError::AliasTaken(_)));
}

#[tokio::test]
async fn three_counter_failures_trip_the_breaker_and_the_next_mint_uses_hash() {
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(FailingCounterStore(inner));
    let service = IdService::new(store, 1_000_000, 10_000, &hash_config(), &breaker_config(3), 7);

    for _ in 0..3 {
        assert!(service.mint_code("https://example.com/y").await.is_err());
    }
    assert_eq!(service.circuit_state(), CircuitState::Hash);

    let outcome = service.mint_code("https://example.com/y").await.unwrap();
    assert_eq!(outcome.source, MintSource::Hash);
    assert_eq!(outcome.short_code.len(), 7);
}

#[tokio::test]
async fn clicks_in_the_same_window_aggregate_into_one_daily_summary_delta() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(InMemoryClickBus::new());
    let consumer = Arc::new(AggregationConsumer::new(bus.clone(), store.clone(), Duration::from_secs(300), Duration::from_secs(60)));

    let window_start = Utc::now() - chrono::Duration::minutes(10);
    let ips = ["1.1.1.1", "2.2.2.2", "1.1.1.1"];
    for (i, ip) in ips.iter().enumerate() {
        let mut event = ClickEvent::new("AA3Qf2b".to_string());
        event.timestamp = window_start + chrono::Duration::seconds(i as i64 * 30);
        event.ip_address = Some(ip.to_string());
        bus.produce(BusMessage {
            partition_key: event.short_code.clone(),
            payload: serde_json::to_vec(&event).unwrap(),
            headers: MessageHeaders {
                event_type: "click".to_string(),
                version: "1.0".to_string(),
                event_id: event.event_id.clone(),
            },
        })
        .await
        .unwrap();
    }

    for _ in 0..ips.len() {
        assert!(consumer.consume_one(Duration::from_millis(50)).await);
    }

    let flushed = consumer.flush_due_windows(Utc::now()).await;
    assert_eq!(flushed, 1);

    let summary = store.get_daily_summary("AA3Qf2b", window_start.date_naive()).await.unwrap().unwrap();
    assert_eq!(summary.total_clicks, 3);
    assert_eq!(summary.unique_visitors, 2);
}

#[tokio::test]
async fn expired_mapping_misses_then_short_circuits_on_the_negative_marker() {
    let store = Arc::new(MemoryStore::new());
    let local = Arc::new(LocalCache::new(100));
    let distributed = Arc::new(MemoryDistributedCache::default());
    let lookup = Arc::new(MultiLayerLookup::new(local, distributed, store.clone()));

    store
        .insert(NewMapping {
            short_code: "expired1".to_string(),
            long_url: "https://example.com/old".to_string(),
            long_url_hash: "h".to_string(),
            expires_at: Some(Utc::now() - chrono::Duration::days(1)),
            user_id: None,
            is_custom_alias: false,
        })
        .await
        .unwrap();

    assert!(lookup.lookup("expired1").await.is_none());
    lookup.mark_expired("expired1").await;

    assert!(lookup.lookup("expired1").await.is_none());

    let manager = Arc::new(ExpiryManager::new(lookup, store, SweepConfig::default()));
    let stats = manager.run_soft_expire_sweep().await;
    assert_eq!(stats.affected, 1);

    let repeat = manager.run_soft_expire_sweep().await;
    assert_eq!(repeat.affected, 0);
}

#[tokio::test]
async fn producer_buffers_through_a_bus_outage_and_flushes_once_ready() {
    let bus = Arc::new(InMemoryClickBus::new());
    let producer = Arc::new(shortlink_core::events::ClickEventProducer::new(bus.clone(), 10_000));

    for i in 0..100 {
        producer.publish(ClickEvent::new(format!("code{i:04}")));
    }
    assert_eq!(producer.stats().buffered, 100);

    producer.connect(1).await;
    producer.flush().await;
    assert_eq!(producer.stats().buffered, 0);

    let mut received = 0;
    while bus.poll(Duration::from_millis(20)).await.is_some() {
        received += 1;
    }
    assert_eq!(received, 100);
}

#[tokio::test]
async fn producer_drops_new_events_once_the_buffer_is_saturated() {
    let bus = Arc::new(InMemoryClickBus::new());
    let producer = Arc::new(shortlink_core::events::ClickEventProducer::new(bus, 10_000));

    for i in 0..10_001 {
        producer.publish(ClickEvent::new(format!("code{i:05}")));
    }

    assert_eq!(producer.stats().buffered, 10_000);
    assert_eq!(producer.overflow_count(), 1);
}
