// Target selection tests: quota split, ranking, exploration, store-backed scheduling

mod common;

use std::collections::{BTreeMap, HashSet};

use common::{memory_store, summary_with_variance};
use netprobe::config::SchedulerConfig;
use netprobe::error::CoreError;
use netprobe::models::*;
use netprobe::scheduler::{TargetScheduler, plan_schedule, rank_by_delay_variance, ranked_quota};
use netprobe::store::StatsStore;
use rand::SeedableRng;
use rand::rngs::StdRng;

const ONE_THIRD: f64 = 1.0 / 3.0;

fn landmarks(ids: &[&str]) -> Vec<Entity> {
    ids.iter().map(|id| Entity::landmark(*id, "h")).collect()
}

fn summaries(agent: &str, variances: &[(&str, f64)]) -> BTreeMap<String, StatSummary> {
    variances
        .iter()
        .map(|(t, v)| (t.to_string(), summary_with_variance(agent, t, *v)))
        .collect()
}

fn assert_distinct(schedule: &Schedule) {
    let ids = schedule.target_ids();
    let unique: HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len(), "duplicate targets in {ids:?}");
}

#[test]
fn quota_split_for_larger_requests() {
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(ranked_quota(0, ONE_THIRD, &mut rng), 0);
    assert_eq!(ranked_quota(3, ONE_THIRD, &mut rng), 2);
    assert_eq!(ranked_quota(4, ONE_THIRD, &mut rng), 2);
    assert_eq!(ranked_quota(6, ONE_THIRD, &mut rng), 4);
    assert_eq!(ranked_quota(5, 0.0, &mut rng), 5);
    assert_eq!(ranked_quota(5, 1.0, &mut rng), 0);
}

#[test]
fn single_pick_blind_rate_converges() {
    let mut rng = StdRng::seed_from_u64(42);
    let stats = summaries("a1", &[("t1", 4.0)]);
    let catalog = landmarks(&["t1", "t2", "t3"]);

    let rounds = 10_000;
    let mut blind = 0;
    for _ in 0..rounds {
        let s = plan_schedule("a1", 1, &stats, &catalog, ONE_THIRD, &mut rng);
        assert_eq!(s.len(), 1);
        blind += s.count(Selection::Blind);
    }
    let rate = blind as f64 / rounds as f64;
    assert!((rate - ONE_THIRD).abs() < 0.02, "blind rate {rate}");
}

#[test]
fn single_pick_extreme_ratios() {
    let mut rng = StdRng::seed_from_u64(3);
    let stats = summaries("a1", &[("t1", 4.0)]);
    let catalog = landmarks(&["t1", "t2"]);
    for _ in 0..100 {
        let s = plan_schedule("a1", 1, &stats, &catalog, 1.0, &mut rng);
        assert_eq!(s.count(Selection::Blind), 1);
    }
    let s = plan_schedule("a1", 1, &stats, &catalog, 0.0, &mut rng);
    assert_eq!(s.target_ids(), vec!["t1"]);
    assert_eq!(s.entries[0].selection, Selection::Ranked);
}

#[test]
fn never_schedules_self() {
    let mut rng = StdRng::seed_from_u64(9);
    let stats = summaries("a1", &[("a1", 1000.0), ("t1", 1.0)]);
    let mut catalog = landmarks(&["t1", "t2"]);
    catalog.push(Entity::peer("a1", "h"));

    for _ in 0..200 {
        let s = plan_schedule("a1", 3, &stats, &catalog, ONE_THIRD, &mut rng);
        assert!(!s.target_ids().contains(&"a1"));
        assert_distinct(&s);
    }
}

#[test]
fn ranked_shortfall_becomes_blind() {
    let mut rng = StdRng::seed_from_u64(5);
    let stats = summaries("a1", &[("t0", 7.0)]);
    let ids: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let catalog = landmarks(&id_refs);

    let s = plan_schedule("a1", 5, &stats, &catalog, ONE_THIRD, &mut rng);
    assert_eq!(s.len(), 5);
    assert_eq!(s.count(Selection::Ranked), 1);
    assert_eq!(s.count(Selection::Blind), 4);
    assert_eq!(s.entries[0].target_id, "t0");
    assert_eq!(s.entries[0].selection, Selection::Ranked);
    assert_distinct(&s);
}

#[test]
fn ranking_by_variance_with_id_tie_break() {
    let stats = summaries("a1", &[("t3", 5.0), ("t1", 5.0), ("t2", 9.0), ("t4", 0.5)]);
    assert_eq!(rank_by_delay_variance("a1", &stats), vec!["t2", "t1", "t3", "t4"]);

    let mut rng = StdRng::seed_from_u64(0);
    let catalog = landmarks(&["t1", "t2", "t3", "t4"]);
    let s = plan_schedule("a1", 3, &stats, &catalog, 0.0, &mut rng);
    assert_eq!(s.target_ids(), vec!["t2", "t1", "t3"]);
    assert_eq!(s.count(Selection::Ranked), 3);
}

#[test]
fn ranked_picks_come_first() {
    let mut rng = StdRng::seed_from_u64(11);
    let stats = summaries("a1", &[("t1", 3.0), ("t2", 8.0), ("t3", 1.0)]);
    let catalog = landmarks(&["t1", "t2", "t3", "t4", "t5", "t6"]);
    let s = plan_schedule("a1", 6, &stats, &catalog, 0.5, &mut rng);

    assert_eq!(s.count(Selection::Ranked), 3);
    assert_eq!(&s.target_ids()[..3], &["t2", "t1", "t3"]);
    assert!(s.entries[3..].iter().all(|e| e.selection == Selection::Blind));
    assert_distinct(&s);
}

#[test]
fn no_stats_means_all_blind() {
    let mut rng = StdRng::seed_from_u64(2);
    let catalog = landmarks(&["t1", "t2", "t3", "t4", "t5"]);
    let s = plan_schedule("a1", 3, &BTreeMap::new(), &catalog, ONE_THIRD, &mut rng);
    assert_eq!(s.len(), 3);
    assert_eq!(s.count(Selection::Blind), 3);
    assert_distinct(&s);
}

#[test]
fn empty_catalog_and_no_stats_is_empty() {
    let mut rng = StdRng::seed_from_u64(2);
    let s = plan_schedule("a1", 4, &BTreeMap::new(), &[], ONE_THIRD, &mut rng);
    assert!(s.is_empty());
    assert_eq!(s.agent_id, "a1");
}

#[test]
fn short_schedule_when_catalog_exhausted() {
    let mut rng = StdRng::seed_from_u64(2);
    let catalog = landmarks(&["t1", "t2"]);
    let s = plan_schedule("a1", 10, &BTreeMap::new(), &catalog, ONE_THIRD, &mut rng);
    assert_eq!(s.len(), 2);
    assert_distinct(&s);
}

#[test]
fn zero_request_is_empty() {
    let mut rng = StdRng::seed_from_u64(2);
    let stats = summaries("a1", &[("t1", 1.0)]);
    let s = plan_schedule("a1", 0, &stats, &landmarks(&["t1"]), ONE_THIRD, &mut rng);
    assert!(s.is_empty());
}

#[test]
fn same_seed_same_schedule() {
    let stats = summaries("a1", &[("t1", 2.0)]);
    let catalog = landmarks(&["t1", "t2", "t3", "t4", "t5", "t6", "t7"]);
    let a = plan_schedule("a1", 4, &stats, &catalog, 0.5, &mut StdRng::seed_from_u64(77));
    let b = plan_schedule("a1", 4, &stats, &catalog, 0.5, &mut StdRng::seed_from_u64(77));
    assert_eq!(a, b);
}

#[tokio::test]
async fn unregistered_agent_is_rejected() {
    let store = memory_store(&["a1"], &["t1"]).await;
    let scheduler = TargetScheduler::new(store, SchedulerConfig::default());

    let err = scheduler.get_schedule("ghost", 1).await.unwrap_err();
    assert!(matches!(err, CoreError::NoSuchAgent(_)));
    let err = scheduler.get_schedule("t1", 1).await.unwrap_err();
    assert!(matches!(err, CoreError::NoSuchAgent(_)));
}

#[tokio::test]
async fn store_backed_schedule_prefers_high_variance() {
    let store = memory_store(&["a1", "a2"], &["t1", "t2", "t3"]).await;
    store
        .upsert_summary(&summary_with_variance("a1", "t1", 1.0))
        .await
        .unwrap();
    store
        .upsert_summary(&summary_with_variance("a1", "t3", 50.0))
        .await
        .unwrap();
    // Another agent's stats never influence a1's ranking.
    store
        .upsert_summary(&summary_with_variance("a2", "t2", 999.0))
        .await
        .unwrap();

    let config = SchedulerConfig {
        blind_ratio: 0.0,
        default_num: 2,
    };
    let scheduler = TargetScheduler::with_rng(store, config, StdRng::seed_from_u64(4));
    let s = scheduler.schedule_round("a1").await.unwrap();
    assert_eq!(s.target_ids(), vec!["t3", "t1"]);
}

#[tokio::test]
async fn store_backed_schedule_covers_peers_and_landmarks() {
    let store = memory_store(&["a1", "a2", "a3"], &["t1"]).await;
    let scheduler = TargetScheduler::with_rng(
        store,
        SchedulerConfig::default(),
        StdRng::seed_from_u64(8),
    );

    let s = scheduler.get_schedule("a1", 10).await.unwrap();
    let mut ids = s.target_ids();
    ids.sort_unstable();
    assert_eq!(ids, vec!["a2", "a3", "t1"]);
}
