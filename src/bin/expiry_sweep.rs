//! Standalone trigger for the expiry sweeps: one-shot by default, or a
//! daemon that runs both sweeps on their configured schedules.

use std::sync::Arc;

use clap::Parser;
use shortlink_core::cache::{DistributedCache, LocalCache, MultiLayerLookup};
use shortlink_core::config::AppConfig;
use shortlink_core::expiry::{ExpiryManager, SweepConfig};
use shortlink_core::store::PgStore;

#[derive(Parser, Debug)]
#[command(name = "expiry-sweep", about = "Runs the soft-expire and hard-delete sweeps")]
struct Args {
    #[arg(long, env = "SHORTLINK_CONFIG")]
    config: Option<String>,

    /// Run continuously on the configured schedule instead of once.
    #[arg(long)]
    daemon: bool,

    /// Skip the hard-delete sweep on a one-shot run.
    #[arg(long)]
    soft_only: bool,
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

    let distributed = match DistributedCache::connect(&config.distributed_cache).await {
        Ok(d) => Arc::new(d),
        Err(e) => {
            log::error!("failed to connect to distributed cache: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };
    let local = Arc::new(LocalCache::new(config.lru.capacity));
    let lookup = Arc::new(MultiLayerLookup::new(local, distributed, store.clone()));

    let manager = Arc::new(ExpiryManager::new(
        lookup,
        store,
        SweepConfig {
            soft_expire_interval: std::time::Duration::from_secs(config.expiry.soft_expire_interval_secs),
            hard_delete_interval: std::time::Duration::from_secs(24 * 60 * 60),
            hard_delete_retention: std::time::Duration::from_secs(config.expiry.hard_delete_retention_days as u64 * 24 * 60 * 60),
        },
    ));

    if args.daemon {
        log::info!("expiry sweep starting in daemon mode");
        let soft_handle = manager.clone().spawn_soft_expire_loop();
        let hard_handle = manager.clone().spawn_hard_delete_loop();
        shutdown_signal().await;
        log::info!("expiry sweep received shutdown signal, stopping");
        soft_handle.abort();
        hard_handle.abort();
        return std::process::ExitCode::SUCCESS;
    }

    let soft_stats = manager.run_soft_expire_sweep().await;
    log::info!(
        "soft-expire sweep done: processed={} affected={} errors={}",
        soft_stats.processed, soft_stats.affected, soft_stats.errors
    );

    if !args.soft_only {
        let hard_stats = manager.run_hard_delete_sweep().await;
        log::info!(
            "hard-delete sweep done: processed={} affected={} errors={}",
            hard_stats.processed, hard_stats.affected, hard_stats.errors
        );
    }

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
