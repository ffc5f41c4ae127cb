//! Standalone aggregation consumer entry point: starts the consumer and
//! its window flusher, logs periodic stats, and stops cleanly on
//! SIGINT/SIGTERM.
//!
//! The in-process click bus means this binary only sees events published
//! by a producer running in the same process; a deployment that needs the
//! consumer and the redirect-serving process to be separate would swap
//! [`shortlink_core::events::InMemoryClickBus`] for a real broker client
//! behind the same [`shortlink_core::events::ClickBus`] trait.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shortlink_core::config::AppConfig;
use shortlink_core::events::{AggregationConsumer, InMemoryClickBus};
use shortlink_core::store::PgStore;

#[derive(Parser, Debug)]
#[command(name = "aggregation-consumer", about = "Rolls click events into windowed daily summaries")]
struct Args {
    /// Path to a JSON config file; falls back to defaults plus env overrides.
    #[arg(long, env = "SHORTLINK_CONFIG")]
    config: Option<String>,

    /// How often to log consumer stats, in seconds.
    #[arg(long, default_value_t = 30)]
    stats_interval_secs: u64,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::from_file(path).map(|c| c.apply_env_overrides()),
        None => Ok(AppConfig::default().apply_env_overrides()),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load config: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let pool_config = shortlink_core::store::pool::PoolConfig::from(&config.store);
    let pool = match shortlink_core::store::pool::connect(&pool_config).await {
        Ok(p) => p,
        Err(e) => {
            log::error!("failed to connect to store: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    let store = Arc::new(PgStore::new(pool));
    if let Err(e) = store.migrate().await {
        log::error!("failed to run migrations: {e}");
        return std::process::ExitCode::FAILURE;
    }

    let bus = Arc::new(InMemoryClickBus::new());
    let consumer = Arc::new(AggregationConsumer::new(
        bus,
        store,
        Duration::from_secs(config.consumer.window_size_secs.max(1) as u64),
        Duration::from_secs(config.consumer.late_grace_secs.max(0) as u64),
    ));

    log::info!("aggregation consumer starting, consumer group {}", config.consumer.consumer_group);
    let consume_handle = consumer.clone().spawn_consume_loop();
    let flush_handle = consumer.clone().spawn_flush_loop(Duration::from_secs(config.consumer.flush_interval_secs));

    let stats_consumer = consumer.clone();
    let stats_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(args.stats_interval_secs));
        loop {
            ticker.tick().await;
            log::info!("active aggregation windows: {}", stats_consumer.active_window_count());
        }
    });

    shutdown_signal().await;
    log::info!("aggregation consumer received shutdown signal, stopping");

    consume_handle.abort();
    flush_handle.abort();
    stats_handle.abort();

    std::process::ExitCode::SUCCESS
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
