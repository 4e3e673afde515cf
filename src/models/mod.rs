// Domain models: entities, raw probe results, running statistics, schedules

mod entity;
mod result;
mod schedule;
mod stats;

pub use entity::{Entity, EntityRole};
pub use result::{DelaySequence, LoggedResult, MAX_RTT_MS, ProbeOutcome, RawResult, median};
pub use schedule::{Schedule, ScheduledTarget, Selection};
pub use stats::{Estimate, MetricKind, StatSummary};

/// Current time in ms since epoch; 0 if the clock is before the epoch.
pub fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "unix_millis", "system time error");
            0
        })
}
