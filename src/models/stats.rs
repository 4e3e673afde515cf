// Per-(agent, target) running statistics.
// One Estimate per metric kind plus all-time counters and extrema.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    MeanDelay,
    AverageMedianDelay,
    AveragePacketLoss,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::MeanDelay,
        MetricKind::AverageMedianDelay,
        MetricKind::AveragePacketLoss,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::MeanDelay => "mean_delay",
            MetricKind::AverageMedianDelay => "average_median_delay",
            MetricKind::AveragePacketLoss => "average_packet_loss",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// Weighted estimate of one metric. `std_dev` is always `sqrt(variance)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    pub value: f64,
    pub variance: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatSummary {
    pub agent_id: String,
    pub target_id: String,
    pub mean_delay: Estimate,
    pub average_median_delay: Estimate,
    pub average_packet_loss: Estimate,
    pub total_probe_count: u64,
    pub total_packet_loss: u64,
    /// All-time extrema; None until the first result is folded.
    pub max_rtt: Option<f64>,
    pub min_rtt: Option<f64>,
    /// Bumped on every commit; 0 means never persisted.
    pub version: u64,
    pub updated_at: i64,
}

impl StatSummary {
    /// Cold-start state for a pair with no history.
    pub fn cold(agent_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            target_id: target_id.into(),
            mean_delay: Estimate::default(),
            average_median_delay: Estimate::default(),
            average_packet_loss: Estimate::default(),
            total_probe_count: 0,
            total_packet_loss: 0,
            max_rtt: None,
            min_rtt: None,
            version: 0,
            updated_at: 0,
        }
    }

    pub fn estimate(&self, kind: MetricKind) -> &Estimate {
        match kind {
            MetricKind::MeanDelay => &self.mean_delay,
            MetricKind::AverageMedianDelay => &self.average_median_delay,
            MetricKind::AveragePacketLoss => &self.average_packet_loss,
        }
    }

    pub fn estimate_mut(&mut self, kind: MetricKind) -> &mut Estimate {
        match kind {
            MetricKind::MeanDelay => &mut self.mean_delay,
            MetricKind::AverageMedianDelay => &mut self.average_median_delay,
            MetricKind::AveragePacketLoss => &mut self.average_packet_loss,
        }
    }

    /// Exploitation priority: variance of the mean delay.
    pub fn delay_variance(&self) -> f64 {
        self.mean_delay.variance
    }
}
