// In-process StatsStore. One RwLock over all tables, so every call is atomic
// and reads never observe a half-applied commit.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use super::StatsStore;
use crate::error::{CoreError, CoreResult};
use crate::models::{Entity, EntityRole, LoggedResult, ProbeOutcome, StatSummary};

#[derive(Default)]
struct Tables {
    entities: BTreeMap<String, Entity>,
    /// agent id -> target id -> summary
    summaries: HashMap<String, BTreeMap<String, StatSummary>>,
    /// agent id -> raw log in append order
    raw: HashMap<String, Vec<LoggedResult>>,
}

impl Tables {
    fn append(&mut self, agent_id: &str, target_id: &str, results: &[ProbeOutcome]) {
        let log = self.raw.entry(agent_id.to_string()).or_default();
        log.extend(results.iter().map(|o| LoggedResult {
            agent_id: agent_id.to_string(),
            target_id: target_id.to_string(),
            outcome: o.clone(),
        }));
    }

    fn put_summary(&mut self, summary: &StatSummary) {
        self.summaries
            .entry(summary.agent_id.clone())
            .or_default()
            .insert(summary.target_id.clone(), summary.clone());
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsStore for MemoryStore {
    async fn get_entity(&self, id: &str) -> CoreResult<Option<Entity>> {
        Ok(self.tables.read().await.entities.get(id).cloned())
    }

    async fn register_entity(&self, entity: &Entity) -> CoreResult<()> {
        let mut t = self.tables.write().await;
        t.entities
            .entry(entity.id.clone())
            .and_modify(|existing| existing.host = entity.host.clone())
            .or_insert_with(|| entity.clone());
        Ok(())
    }

    async fn peer_beacon(&self, id: &str, host: &str, last_seen_ms: i64) -> CoreResult<()> {
        let mut t = self.tables.write().await;
        let Some(entity) = t
            .entities
            .get_mut(id)
            .filter(|e| e.role == EntityRole::Peer)
        else {
            return Err(CoreError::NoSuchAgent(id.to_string()));
        };
        entity.host = host.to_string();
        entity.last_seen = Some(
            entity
                .last_seen
                .map_or(last_seen_ms, |prev| prev.max(last_seen_ms)),
        );
        Ok(())
    }

    async fn active_peers(&self, since_ms: i64) -> CoreResult<Vec<Entity>> {
        let t = self.tables.read().await;
        Ok(t.entities
            .values()
            .filter(|e| e.is_peer() && e.last_seen.is_some_and(|ts| ts > since_ms))
            .cloned()
            .collect())
    }

    async fn get_catalog(&self, exclude_id: Option<&str>) -> CoreResult<Vec<Entity>> {
        let t = self.tables.read().await;
        Ok(t.entities
            .values()
            .filter(|e| Some(e.id.as_str()) != exclude_id)
            .cloned()
            .collect())
    }

    async fn get_summary(&self, agent_id: &str, target_id: &str) -> CoreResult<Option<StatSummary>> {
        let t = self.tables.read().await;
        Ok(t.summaries
            .get(agent_id)
            .and_then(|m| m.get(target_id))
            .cloned())
    }

    async fn get_all_summaries(&self, agent_id: &str) -> CoreResult<BTreeMap<String, StatSummary>> {
        let t = self.tables.read().await;
        Ok(t.summaries.get(agent_id).cloned().unwrap_or_default())
    }

    async fn upsert_summary(&self, summary: &StatSummary) -> CoreResult<()> {
        self.tables.write().await.put_summary(summary);
        Ok(())
    }

    async fn append_raw_results(
        &self,
        agent_id: &str,
        target_id: &str,
        results: &[ProbeOutcome],
    ) -> CoreResult<()> {
        self.tables.write().await.append(agent_id, target_id, results);
        Ok(())
    }

    async fn commit_batch(
        &self,
        summary: &StatSummary,
        expected_version: u64,
        results: &[ProbeOutcome],
    ) -> CoreResult<()> {
        let mut t = self.tables.write().await;
        let stored = t
            .summaries
            .get(&summary.agent_id)
            .and_then(|m| m.get(&summary.target_id))
            .map_or(0, |s| s.version);
        if stored != expected_version {
            return Err(CoreError::Conflict {
                agent_id: summary.agent_id.clone(),
                target_id: summary.target_id.clone(),
                expected: expected_version,
            });
        }
        t.put_summary(summary);
        t.append(&summary.agent_id, &summary.target_id, results);
        Ok(())
    }

    async fn recent_raw_results(&self, agent_id: &str, limit: u32) -> CoreResult<Vec<LoggedResult>> {
        let t = self.tables.read().await;
        let Some(log) = t.raw.get(agent_id) else {
            return Ok(Vec::new());
        };
        let skip = log.len().saturating_sub(limit as usize);
        Ok(log[skip..].to_vec())
    }

    async fn purge_results(&self, agent_id: &str) -> CoreResult<u64> {
        let mut t = self.tables.write().await;
        Ok(t.raw.remove(agent_id).map_or(0, |log| log.len() as u64))
    }

    async fn purge_results_older_than(&self, agent_id: &str, timestamp_ms: i64) -> CoreResult<u64> {
        let mut t = self.tables.write().await;
        let Some(log) = t.raw.get_mut(agent_id) else {
            return Ok(0);
        };
        let before = log.len();
        log.retain(|r| r.outcome.recorded_at_ms >= timestamp_ms);
        Ok((before - log.len()) as u64)
    }

    async fn prune_raw_results_before(&self, cutoff_ms: i64) -> CoreResult<u64> {
        let mut t = self.tables.write().await;
        let mut removed = 0u64;
        for log in t.raw.values_mut() {
            let before = log.len();
            log.retain(|r| r.outcome.recorded_at_ms >= cutoff_ms);
            removed += (before - log.len()) as u64;
        }
        Ok(removed)
    }

    async fn purge_agent(&self, agent_id: &str) -> CoreResult<()> {
        let mut t = self.tables.write().await;
        t.summaries.remove(agent_id);
        t.raw.remove(agent_id);
        Ok(())
    }
}
