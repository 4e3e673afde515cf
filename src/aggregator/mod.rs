// Folds reported probe batches into persisted per-(agent, target) summaries.
// Load, fold and commit run under a per-pair guard; the store's version check
// rejects commits racing with writers outside this process.

pub mod estimator;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, instrument, warn};

use crate::config::AggregatorConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{ProbeOutcome, RawResult, StatSummary, unix_millis};
use crate::store::{StatsStore, require_peer};

type PairKey = (String, String);

pub struct StatsAggregator<S> {
    store: Arc<S>,
    config: AggregatorConfig,
    /// One async mutex per (agent, target) with an update in flight.
    pair_locks: Mutex<HashMap<PairKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: StatsStore> StatsAggregator<S> {
    pub fn new(store: Arc<S>, config: AggregatorConfig) -> Self {
        Self {
            store,
            config,
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fold `batch` into the summary for (agent_id, target_id) and persist it together
    /// with the raw results. Malformed entries are skipped with a warning; the rest are
    /// applied all-or-nothing.
    #[instrument(skip(self, batch), fields(batch_len = batch.len()))]
    pub async fn update(
        &self,
        agent_id: &str,
        target_id: &str,
        batch: &[RawResult],
    ) -> CoreResult<StatSummary> {
        require_peer(self.store.as_ref(), agent_id).await?;

        let outcomes = validate_batch(batch);
        if outcomes.is_empty() {
            return Err(CoreError::EmptyBatch {
                agent_id: agent_id.to_string(),
                target_id: target_id.to_string(),
            });
        }

        let key = (agent_id.to_string(), target_id.to_string());
        let lock = self.pair_lock(&key);
        let guard = lock.lock().await;
        let result = self.fold_and_commit(agent_id, target_id, &outcomes).await;
        drop(guard);
        self.release_pair_lock(&key, lock);
        result
    }

    async fn fold_and_commit(
        &self,
        agent_id: &str,
        target_id: &str,
        outcomes: &[ProbeOutcome],
    ) -> CoreResult<StatSummary> {
        let prior = self
            .store
            .get_summary(agent_id, target_id)
            .await?
            .unwrap_or_else(|| StatSummary::cold(agent_id, target_id));

        let mut next = estimator::fold_batch(&prior, outcomes, &self.config);
        next.version = prior.version + 1;
        next.updated_at = unix_millis();

        self.store
            .commit_batch(&next, prior.version, outcomes)
            .await?;

        debug!(
            operation = "commit_batch",
            folded = outcomes.len(),
            version = next.version,
            delay_variance = next.delay_variance(),
            "summary updated"
        );
        Ok(next)
    }

    fn pair_lock(&self, key: &PairKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .pair_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Drop the map entry once no other update holds or awaits it.
    fn release_pair_lock(&self, key: &PairKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .pair_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }
}

/// Validate every entry in arrival order, skipping (and logging) malformed ones.
pub fn validate_batch(batch: &[RawResult]) -> Vec<ProbeOutcome> {
    let mut out = Vec::with_capacity(batch.len());
    for (index, raw) in batch.iter().enumerate() {
        match raw.validate() {
            Ok(outcome) => out.push(outcome),
            Err(e) => warn!(index, error = %e, "skipping malformed result"),
        }
    }
    out
}
