use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Raw results older than this are deleted by the maintenance worker.
    #[serde(default = "default_raw_retention_days")]
    pub raw_retention_days: u32,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_raw_retention_days() -> u32 {
    7
}

fn default_maintenance_interval_secs() -> u64 {
    3600
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

/// Target selection knobs, passed to `TargetScheduler::new`.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Long-run fraction of exploratory (random) picks.
    #[serde(default = "default_blind_ratio")]
    pub blind_ratio: f64,
    /// Targets per round when the caller does not ask for a count.
    #[serde(default = "default_num")]
    pub default_num: usize,
}

fn default_blind_ratio() -> f64 {
    1.0 / 3.0
}

fn default_num() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            blind_ratio: default_blind_ratio(),
            default_num: default_num(),
        }
    }
}

/// How the packet-loss datum is computed for each folded result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketLossMode {
    /// packet_loss_i / probe_count_i of the result being folded.
    #[default]
    PerResult,
    /// Running batch totals: sum(packet_loss) / sum(probe_count) up to this result.
    /// Reproduces values stored by older deployments.
    Cumulative,
}

/// Estimator knobs, passed to `StatsAggregator::new`.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// EWMA weight applied to every new datum.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub packet_loss_mode: PacketLossMode,
}

fn default_alpha() -> f64 {
    0.5
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            packet_loss_mode: PacketLossMode::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.raw_retention_days > 0,
            "database.raw_retention_days must be > 0, got {}",
            self.database.raw_retention_days
        );
        anyhow::ensure!(
            self.database.maintenance_interval_secs > 0,
            "database.maintenance_interval_secs must be > 0, got {}",
            self.database.maintenance_interval_secs
        );
        anyhow::ensure!(
            self.database.vacuum_interval_secs > 0,
            "database.vacuum_interval_secs must be > 0, got {}",
            self.database.vacuum_interval_secs
        );
        if let Some(ref expr) = self.database.vacuum_schedule {
            anyhow::ensure!(
                <cron::Schedule as std::str::FromStr>::from_str(expr).is_ok(),
                "database.vacuum_schedule is not a valid cron expression: {:?}",
                expr
            );
        }
        self.scheduler.validate()?;
        self.aggregator.validate()?;
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.blind_ratio),
            "scheduler.blind_ratio must be within 0.0..=1.0, got {}",
            self.blind_ratio
        );
        anyhow::ensure!(
            self.default_num >= 1,
            "scheduler.default_num must be >= 1, got {}",
            self.default_num
        );
        Ok(())
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.alpha > 0.0 && self.alpha <= 1.0,
            "aggregator.alpha must be within (0.0, 1.0], got {}",
            self.alpha
        );
        Ok(())
    }
}
