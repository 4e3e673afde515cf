// Exponentially-weighted running mean/variance and the per-batch fold.
// Pure logic only; loading and committing summaries stays in aggregator::mod.

use crate::config::{AggregatorConfig, PacketLossMode};
use crate::models::{Estimate, ProbeOutcome, StatSummary};

/// One EWMA step with weight `alpha` on the new datum.
///
/// value' = value + alpha * delta
/// variance' = (1 - alpha) * (variance + alpha * delta^2)
///
/// Older data decays by (1 - alpha) per step.
pub fn ewma_step(prior: Estimate, datum: f64, alpha: f64) -> Estimate {
    let delta = datum - prior.value;
    let value = prior.value + alpha * delta;
    let variance = (1.0 - alpha) * (prior.variance + alpha * delta * delta);
    Estimate {
        value,
        variance,
        std_dev: variance.sqrt(),
    }
}

/// Folds validated results, in arrival order, into a copy of `prior`.
/// Counters and extrema accumulate; the three estimators each see one datum per result
/// (the median estimator only when the result carried delay samples).
/// Version and timestamp are left to the caller.
pub fn fold_batch(
    prior: &StatSummary,
    outcomes: &[ProbeOutcome],
    config: &AggregatorConfig,
) -> StatSummary {
    let alpha = config.alpha;
    let mut next = prior.clone();
    let mut batch_probes: u64 = 0;
    let mut batch_loss: u64 = 0;

    for o in outcomes {
        next.total_probe_count = next.total_probe_count.saturating_add(o.probe_count);
        next.total_packet_loss = next.total_packet_loss.saturating_add(o.packet_loss);
        batch_probes = batch_probes.saturating_add(o.probe_count);
        batch_loss = batch_loss.saturating_add(o.packet_loss);

        next.max_rtt = Some(next.max_rtt.map_or(o.max_rtt, |m| m.max(o.max_rtt)));
        next.min_rtt = Some(next.min_rtt.map_or(o.min_rtt, |m| m.min(o.min_rtt)));

        next.mean_delay = ewma_step(next.mean_delay, o.avg_rtt, alpha);

        if let Some(median) = o.median_delay() {
            next.average_median_delay = ewma_step(next.average_median_delay, median, alpha);
        }

        let loss = match config.packet_loss_mode {
            PacketLossMode::PerResult => o.loss_ratio(),
            // batch_probes > 0: validated results always carry probe_count > 0
            PacketLossMode::Cumulative => batch_loss as f64 / batch_probes as f64,
        };
        next.average_packet_loss = ewma_step(next.average_packet_loss, loss, alpha);
    }

    next
}
