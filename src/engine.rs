// Decision-core facade: one store shared by the aggregator and the scheduler.

use std::sync::Arc;

use futures_util::future::join_all;
use rand::RngCore;
use rand::rngs::StdRng;
use tracing::{info, instrument};

use crate::aggregator::StatsAggregator;
use crate::config::AppConfig;
use crate::error::CoreResult;
use crate::models::{Entity, RawResult, Schedule, StatSummary, unix_millis};
use crate::scheduler::TargetScheduler;
use crate::store::{ACTIVE_THRESHOLD_SECS, StatsStore};

pub struct MeasurementEngine<S, R = StdRng> {
    store: Arc<S>,
    aggregator: StatsAggregator<S>,
    scheduler: TargetScheduler<S, R>,
}

impl<S: StatsStore> MeasurementEngine<S, StdRng> {
    pub fn new(store: Arc<S>, config: &AppConfig) -> Self {
        Self {
            aggregator: StatsAggregator::new(store.clone(), config.aggregator.clone()),
            scheduler: TargetScheduler::new(store.clone(), config.scheduler.clone()),
            store,
        }
    }
}

impl<S: StatsStore, R: RngCore + Send> MeasurementEngine<S, R> {
    pub fn with_rng(store: Arc<S>, config: &AppConfig, rng: R) -> Self {
        Self {
            aggregator: StatsAggregator::new(store.clone(), config.aggregator.clone()),
            scheduler: TargetScheduler::with_rng(store.clone(), config.scheduler.clone(), rng),
            store,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn register(&self, entity: &Entity) -> CoreResult<()> {
        self.store.register_entity(entity).await?;
        info!(entity_id = %entity.id, role = entity.role.as_str(), host = %entity.host, "entity registered");
        Ok(())
    }

    /// Beacon stamped with the current time.
    pub async fn beacon(&self, agent_id: &str, host: &str) -> CoreResult<()> {
        self.store.peer_beacon(agent_id, host, unix_millis()).await
    }

    /// Peers that beaconed within the last hour.
    pub async fn active_peers(&self) -> CoreResult<Vec<Entity>> {
        let since = unix_millis() - ACTIVE_THRESHOLD_SECS * 1000;
        self.store.active_peers(since).await
    }

    pub async fn get_schedule(&self, agent_id: &str, num: usize) -> CoreResult<Schedule> {
        self.scheduler.get_schedule(agent_id, num).await
    }

    pub async fn schedule_round(&self, agent_id: &str) -> CoreResult<Schedule> {
        self.scheduler.schedule_round(agent_id).await
    }

    /// One default-size schedule per agent, in input order. Each agent fails independently.
    #[instrument(skip(self, agent_ids), fields(agents = agent_ids.len()))]
    pub async fn schedule_agents(&self, agent_ids: &[String]) -> Vec<CoreResult<Schedule>> {
        join_all(agent_ids.iter().map(|id| self.scheduler.schedule_round(id))).await
    }

    pub async fn update(
        &self,
        agent_id: &str,
        target_id: &str,
        batch: &[RawResult],
    ) -> CoreResult<StatSummary> {
        self.aggregator.update(agent_id, target_id, batch).await
    }
}
