// Background worker: prune raw results past retention every maintenance_interval_secs.
// VACUUM runs on a configurable schedule (cron expression or fixed interval).
// Summaries are never touched here.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::DatabaseConfig;
use crate::models::unix_millis;
use crate::store::{SqliteStore, StatsStore};

const MS_PER_DAY: i64 = 86_400_000;

/// Config for the maintenance worker.
#[derive(Debug, Clone)]
pub struct MaintenanceWorkerConfig {
    pub maintenance_interval_secs: u64,
    pub raw_retention_days: u32,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

impl From<&DatabaseConfig> for MaintenanceWorkerConfig {
    fn from(db: &DatabaseConfig) -> Self {
        Self {
            maintenance_interval_secs: db.maintenance_interval_secs,
            raw_retention_days: db.raw_retention_days,
            vacuum_schedule: db.vacuum_schedule.clone(),
            vacuum_interval_secs: db.vacuum_interval_secs,
        }
    }
}

/// Spawns the maintenance worker. Returns a join handle.
pub fn spawn(
    store: Arc<SqliteStore>,
    config: MaintenanceWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(store, config).await;
    })
}

#[instrument(skip(store), fields(interval_secs = config.maintenance_interval_secs))]
async fn run(store: Arc<SqliteStore>, config: MaintenanceWorkerConfig) {
    let mut prune_interval =
        tokio::time::interval(Duration::from_secs(config.maintenance_interval_secs));
    prune_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(vacuum_scheduler(config.clone(), vacuum_tx));

    loop {
        tokio::select! {
            _ = prune_interval.tick() => {
                if let Err(e) = run_one_tick(store.as_ref(), &config).await {
                    warn!(error = %e, "maintenance tick failed");
                }
            }
            _ = vacuum_rx.recv() => {
                if let Err(e) = store.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
}

/// Sends a message on `tx` at each VACUUM time (cron or fixed interval). Uses local time for cron.
async fn vacuum_scheduler(config: MaintenanceWorkerConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.vacuum_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            if let Some(next) = schedule.after(&now).next() {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.vacuum_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// Oldest timestamp (ms) that survives a retention of `days` as of `now_ms`.
pub fn retention_cutoff(now_ms: i64, days: u32) -> i64 {
    now_ms - i64::from(days) * MS_PER_DAY
}

/// Runs one retention pass over the raw-result log. Returns the number of rows removed.
pub async fn run_one_tick<S: StatsStore>(
    store: &S,
    config: &MaintenanceWorkerConfig,
) -> anyhow::Result<u64> {
    let cutoff = retention_cutoff(unix_millis(), config.raw_retention_days);
    let removed = store.prune_raw_results_before(cutoff).await?;
    if removed > 0 {
        info!(
            removed,
            retention_days = config.raw_retention_days,
            "raw results pruned"
        );
    }
    Ok(removed)
}
