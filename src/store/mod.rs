// Persistence contract for per-(agent, target) summaries, the entity catalog and the raw-result log.
// Backends: SqliteStore (sqlx, WAL) and MemoryStore (in-process).
//
// Consistency: a read that observes a commit's counters also observes its estimates.
// Writes are atomic per call; there is no cross-key transaction.

mod blob;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::models::{Entity, LoggedResult, ProbeOutcome, StatSummary};

/// How long after its last beacon a peer still counts as active.
pub const ACTIVE_THRESHOLD_SECS: i64 = 3600;

pub trait StatsStore: Send + Sync {
    fn get_entity(&self, id: &str) -> impl Future<Output = CoreResult<Option<Entity>>> + Send;

    /// Insert, or update only the host of an existing entity.
    fn register_entity(&self, entity: &Entity) -> impl Future<Output = CoreResult<()>> + Send;

    /// Record that a registered peer is alive at `host`. Fails with NoSuchAgent otherwise.
    fn peer_beacon(
        &self,
        id: &str,
        host: &str,
        last_seen_ms: i64,
    ) -> impl Future<Output = CoreResult<()>> + Send;

    /// Peers with a beacon strictly after `since_ms`, ordered by id.
    fn active_peers(&self, since_ms: i64) -> impl Future<Output = CoreResult<Vec<Entity>>> + Send;

    /// All entities ordered by id, optionally without `exclude_id`.
    fn get_catalog(
        &self,
        exclude_id: Option<&str>,
    ) -> impl Future<Output = CoreResult<Vec<Entity>>> + Send;

    fn get_summary(
        &self,
        agent_id: &str,
        target_id: &str,
    ) -> impl Future<Output = CoreResult<Option<StatSummary>>> + Send;

    /// Every summary the agent owns, keyed by target id.
    fn get_all_summaries(
        &self,
        agent_id: &str,
    ) -> impl Future<Output = CoreResult<BTreeMap<String, StatSummary>>> + Send;

    /// Unconditional write of counters, extrema and all estimates together.
    fn upsert_summary(&self, summary: &StatSummary) -> impl Future<Output = CoreResult<()>> + Send;

    fn append_raw_results(
        &self,
        agent_id: &str,
        target_id: &str,
        results: &[ProbeOutcome],
    ) -> impl Future<Output = CoreResult<()>> + Send;

    /// Writes `summary` and appends `results` in one atomic step, provided the stored
    /// version still equals `expected_version` (0 = no stored summary). Otherwise Conflict
    /// and nothing is written.
    fn commit_batch(
        &self,
        summary: &StatSummary,
        expected_version: u64,
        results: &[ProbeOutcome],
    ) -> impl Future<Output = CoreResult<()>> + Send;

    /// Newest `limit` raw-log rows for the agent, returned oldest first.
    fn recent_raw_results(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> impl Future<Output = CoreResult<Vec<LoggedResult>>> + Send;

    fn purge_results(&self, agent_id: &str) -> impl Future<Output = CoreResult<u64>> + Send;

    fn purge_results_older_than(
        &self,
        agent_id: &str,
        timestamp_ms: i64,
    ) -> impl Future<Output = CoreResult<u64>> + Send;

    /// Retention across all agents: delete raw rows recorded before `cutoff_ms`.
    fn prune_raw_results_before(
        &self,
        cutoff_ms: i64,
    ) -> impl Future<Output = CoreResult<u64>> + Send;

    /// Drop an agent's summaries and raw log. The entity itself stays registered.
    fn purge_agent(&self, agent_id: &str) -> impl Future<Output = CoreResult<()>> + Send;
}

/// Resolve `agent_id` to a registered peer, or NoSuchAgent.
pub async fn require_peer<S: StatsStore>(store: &S, agent_id: &str) -> CoreResult<Entity> {
    match store.get_entity(agent_id).await? {
        Some(entity) if entity.is_peer() => Ok(entity),
        _ => Err(CoreError::NoSuchAgent(agent_id.to_string())),
    }
}
