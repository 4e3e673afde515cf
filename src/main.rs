use std::sync::Arc;

use anyhow::Result;
use netprobe::engine::MeasurementEngine;
use netprobe::store::SqliteStore;
use netprobe::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let store = Arc::new(
        SqliteStore::connect(&app_config.database.path, app_config.database.max_pool_size).await?,
    );
    store.init().await?;

    let engine = MeasurementEngine::new(store.clone(), &app_config);
    let active = engine.active_peers().await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %app_config.database.path,
        active_peers = active.len(),
        blind_ratio = app_config.scheduler.blind_ratio,
        alpha = app_config.aggregator.alpha,
        "stats store ready"
    );

    let worker_handle = maintenance_worker::spawn(
        store.clone(),
        maintenance_worker::MaintenanceWorkerConfig::from(&app_config.database),
    );

    shutdown_signal().await;
    tracing::info!("Received shutdown signal");
    worker_handle.abort();
    let _ = worker_handle.await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
