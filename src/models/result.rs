// Raw probe results as reported by agents, and their validated form.
// Field names match the agent report format (snake_case), unlike the camelCase output models.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Upper bound for any reported RTT or delay sample, in ms (one hour).
/// Keeps the squared EWMA deltas finite.
pub const MAX_RTT_MS: f64 = 3_600_000.0;

fn is_plausible_rtt(v: f64) -> bool {
    v.is_finite() && (0.0..=MAX_RTT_MS).contains(&v)
}

/// Delay samples arrive either as a list or as its text form ("[12.1, 13.0]").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelaySequence {
    Samples(Vec<f64>),
    Text(String),
}

impl DelaySequence {
    pub fn parse(&self) -> CoreResult<Vec<f64>> {
        match self {
            DelaySequence::Samples(v) => Ok(v.clone()),
            DelaySequence::Text(s) => serde_json::from_str::<Vec<f64>>(s.trim())
                .map_err(|e| CoreError::malformed(format!("delay_sequence {:?}: {}", s, e))),
        }
    }
}

/// One probe batch datum for one target, exactly as the agent sent it.
/// Every field is optional here; `validate` decides whether it can be folded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// Probe time in ms since epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub probe_count: Option<u64>,
    pub packet_loss: Option<u64>,
    pub min_rtt: Option<f64>,
    pub avg_rtt: Option<f64>,
    pub max_rtt: Option<f64>,
    #[serde(default)]
    pub delay_sequence: Option<DelaySequence>,
}

impl RawResult {
    /// A complete ping report (helper for agents' adapters and tests).
    pub fn ping(
        probe_count: u64,
        packet_loss: u64,
        min_rtt: f64,
        avg_rtt: f64,
        max_rtt: f64,
        delays: Vec<f64>,
    ) -> Self {
        Self {
            timestamp: None,
            probe_count: Some(probe_count),
            packet_loss: Some(packet_loss),
            min_rtt: Some(min_rtt),
            avg_rtt: Some(avg_rtt),
            max_rtt: Some(max_rtt),
            delay_sequence: Some(DelaySequence::Samples(delays)),
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub fn validate(&self) -> CoreResult<ProbeOutcome> {
        let probe_count = self
            .probe_count
            .ok_or_else(|| CoreError::malformed("missing probe_count"))?;
        let packet_loss = self
            .packet_loss
            .ok_or_else(|| CoreError::malformed("missing packet_loss"))?;
        let min_rtt = required_rtt("min_rtt", self.min_rtt)?;
        let avg_rtt = required_rtt("avg_rtt", self.avg_rtt)?;
        let max_rtt = required_rtt("max_rtt", self.max_rtt)?;

        if probe_count == 0 {
            return Err(CoreError::malformed("probe_count must be > 0"));
        }
        if packet_loss > probe_count {
            return Err(CoreError::malformed(format!(
                "packet_loss {} exceeds probe_count {}",
                packet_loss, probe_count
            )));
        }
        if min_rtt > max_rtt {
            return Err(CoreError::malformed(format!(
                "min_rtt {} > max_rtt {}",
                min_rtt, max_rtt
            )));
        }

        let delays = match &self.delay_sequence {
            Some(seq) => seq.parse()?,
            None => Vec::new(),
        };
        if let Some(bad) = delays.iter().find(|d| !is_plausible_rtt(**d)) {
            return Err(CoreError::malformed(format!("delay sample {}", bad)));
        }

        Ok(ProbeOutcome {
            recorded_at_ms: self.timestamp.unwrap_or_else(super::unix_millis),
            probe_count,
            packet_loss,
            min_rtt,
            avg_rtt,
            max_rtt,
            delays,
        })
    }
}

fn required_rtt(name: &str, v: Option<f64>) -> CoreResult<f64> {
    let v = v.ok_or_else(|| CoreError::malformed(format!("missing {}", name)))?;
    if !is_plausible_rtt(v) {
        return Err(CoreError::malformed(format!("{} = {}", name, v)));
    }
    Ok(v)
}

/// A validated raw result: what the aggregator folds and the raw log stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub recorded_at_ms: i64,
    pub probe_count: u64,
    pub packet_loss: u64,
    pub min_rtt: f64,
    pub avg_rtt: f64,
    pub max_rtt: f64,
    pub delays: Vec<f64>,
}

impl ProbeOutcome {
    /// Median of the delay samples; None when the agent sent no samples.
    pub fn median_delay(&self) -> Option<f64> {
        median(&self.delays)
    }

    pub fn loss_ratio(&self) -> f64 {
        self.packet_loss as f64 / self.probe_count as f64
    }
}

/// Median; mean of the two middle values for even-length input.
pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// A raw-log row: a validated result plus the pair it was reported for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedResult {
    pub agent_id: String,
    pub target_id: String,
    pub outcome: ProbeOutcome,
}
