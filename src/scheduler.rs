// Chooses the targets an agent probes next.
// Ranked picks exploit the targets with the highest delay variance; blind picks draw
// uniformly from the catalog so unseen targets keep getting covered.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, instrument};

use crate::config::SchedulerConfig;
use crate::error::CoreResult;
use crate::models::{Entity, Schedule, ScheduledTarget, Selection, StatSummary};
use crate::store::{StatsStore, require_peer};

/// Absorbs float error in `num * (1 - blind_ratio)` before flooring (e.g. 3 * 2/3).
const QUOTA_EPSILON: f64 = 1e-9;

pub struct TargetScheduler<S, R = StdRng> {
    store: Arc<S>,
    config: SchedulerConfig,
    rng: Mutex<R>,
}

impl<S: StatsStore> TargetScheduler<S, StdRng> {
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Self {
        Self::with_rng(store, config, StdRng::from_entropy())
    }
}

impl<S: StatsStore, R: RngCore + Send> TargetScheduler<S, R> {
    /// Scheduler drawing from `rng`; pass a seeded RNG for reproducible schedules.
    pub fn with_rng(store: Arc<S>, config: SchedulerConfig, rng: R) -> Self {
        Self {
            store,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Up to `num` distinct targets for `agent_id`, ranked picks first. Shorter only when
    /// the catalog runs out of eligible entities.
    #[instrument(skip(self))]
    pub async fn get_schedule(&self, agent_id: &str, num: usize) -> CoreResult<Schedule> {
        require_peer(self.store.as_ref(), agent_id).await?;

        let summaries = self.store.get_all_summaries(agent_id).await?;
        let catalog = self.store.get_catalog(Some(agent_id)).await?;

        let schedule = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            plan_schedule(
                agent_id,
                num,
                &summaries,
                &catalog,
                self.config.blind_ratio,
                &mut *rng,
            )
        };

        debug!(
            requested = num,
            ranked = schedule.count(Selection::Ranked),
            blind = schedule.count(Selection::Blind),
            catalog_size = catalog.len(),
            "schedule built"
        );
        Ok(schedule)
    }

    /// Schedule of the configured default size.
    pub async fn schedule_round(&self, agent_id: &str) -> CoreResult<Schedule> {
        self.get_schedule(agent_id, self.config.default_num).await
    }
}

/// Pure selection step. `catalog` should already be ordered (the stores return it by id)
/// so that a seeded `rng` reproduces the same schedule.
pub fn plan_schedule<R: Rng + ?Sized>(
    agent_id: &str,
    num: usize,
    summaries: &BTreeMap<String, StatSummary>,
    catalog: &[Entity],
    blind_ratio: f64,
    rng: &mut R,
) -> Schedule {
    let mut schedule = Schedule {
        agent_id: agent_id.to_string(),
        entries: Vec::with_capacity(num),
    };
    if num == 0 {
        return schedule;
    }

    let ranked = rank_by_delay_variance(agent_id, summaries);
    // Missing ranked candidates are made up by blind picks.
    let non_blind = ranked_quota(num, blind_ratio, rng).min(ranked.len());
    let blind = num - non_blind;

    let mut chosen: HashSet<&str> = HashSet::with_capacity(num);
    for target_id in ranked.into_iter().take(non_blind) {
        chosen.insert(target_id);
        schedule.entries.push(ScheduledTarget {
            target_id: target_id.to_string(),
            selection: Selection::Ranked,
        });
    }

    let mut pool: Vec<&str> = catalog
        .iter()
        .map(|e| e.id.as_str())
        .filter(|id| *id != agent_id && !chosen.contains(id))
        .collect();
    pool.sort_unstable();
    pool.dedup();

    let (picked, _) = pool.partial_shuffle(rng, blind);
    for target_id in picked.iter() {
        schedule.entries.push(ScheduledTarget {
            target_id: (*target_id).to_string(),
            selection: Selection::Blind,
        });
    }

    schedule
}

/// How many of `num` picks are ranked. A single pick is a coin flip that is blind with
/// probability `blind_ratio`; larger requests split deterministically.
pub fn ranked_quota<R: Rng + ?Sized>(num: usize, blind_ratio: f64, rng: &mut R) -> usize {
    match num {
        0 => 0,
        1 => {
            let x: f64 = rng.gen_range(0.0..1.0);
            if x <= blind_ratio { 0 } else { 1 }
        }
        _ => {
            let quota = ((num as f64) * (1.0 - blind_ratio) + QUOTA_EPSILON).floor();
            (quota.max(0.0) as usize).min(num)
        }
    }
}

/// Measured targets, highest mean-delay variance first; ties by ascending target id.
/// The agent itself is never a candidate.
pub fn rank_by_delay_variance<'a>(
    agent_id: &str,
    summaries: &'a BTreeMap<String, StatSummary>,
) -> Vec<&'a str> {
    let mut ranked: Vec<(&str, f64)> = summaries
        .iter()
        .filter(|(target_id, _)| target_id.as_str() != agent_id)
        .map(|(target_id, s)| (target_id.as_str(), s.delay_variance()))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().map(|(id, _)| id).collect()
}
