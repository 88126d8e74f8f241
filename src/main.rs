//! cachewise sweeper
//!
//! Connects to the configured store and keeps a strategy manager's
//! namespace within its limits, logging statistics as it goes.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cachewise::{
    spawn_eviction_sweep, spawn_stats_reporter, AppConfig, CacheClient, RedisBackend, StrategyManager,
};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect to the store
/// 4. Start the eviction sweep and statistics reporter
/// 5. Wait for SIGINT/SIGTERM, stop the tasks and disconnect
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "cachewise=info", can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachewise=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cachewise sweeper");

    let config = AppConfig::from_env();
    info!(
        host = %config.client.host,
        port = config.client.port,
        prefix = %config.client.key_prefix,
        strategy = ?config.strategy.strategy,
        max_size = ?config.strategy.max_size,
        max_memory_mb = ?config.strategy.max_memory_mb,
        sweep_interval = config.sweep_interval,
        "configuration loaded"
    );

    let backend = Arc::new(
        RedisBackend::new(config.client.clone())
            .await
            .context("failed to connect to the cache store")?,
    );
    let client = CacheClient::from_config(Arc::clone(&backend), &config.client);
    let manager = StrategyManager::new(client.clone(), config.strategy.clone());

    let handles = vec![
        spawn_eviction_sweep(manager.clone(), config.sweep_interval),
        spawn_stats_reporter(manager, config.stats_interval),
    ];
    info!("Background tasks started");

    shutdown_signal(handles).await?;

    client.disconnect().await?;
    info!("Sweeper shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then aborts the background tasks.
async fn shutdown_signal(handles: Vec<JoinHandle<()>>) -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for handle in handles {
        handle.abort();
    }
    warn!("Background tasks aborted");
    Ok(())
}
