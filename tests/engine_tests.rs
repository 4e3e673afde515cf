// End-to-end: registration, beacons, updates and scheduling through MeasurementEngine on SQLite

mod common;

use common::{approx_eq, ping, sqlite_store};
use netprobe::config::AppConfig;
use netprobe::engine::MeasurementEngine;
use netprobe::error::CoreError;
use netprobe::models::*;
use netprobe::store::StatsStore;
use rand::SeedableRng;
use rand::rngs::StdRng;

const CONFIG: &str = r#"
[database]
path = "unused.db"
max_pool_size = 4

[scheduler]
blind_ratio = 0.5
default_num = 2
"#;

#[tokio::test]
async fn update_then_schedule_round_trip() {
    let (_dir, store) = sqlite_store().await;
    let config = AppConfig::load_from_str(CONFIG).unwrap();
    let engine = MeasurementEngine::with_rng(store, &config, StdRng::seed_from_u64(21));

    engine.register(&Entity::peer("a1", "a1.example.net")).await.unwrap();
    engine.register(&Entity::peer("a2", "a2.example.net")).await.unwrap();
    for id in ["l1", "l2", "l3"] {
        engine.register(&Entity::landmark(id, "h")).await.unwrap();
    }

    // Steady target vs jittery target.
    engine
        .update("a1", "l1", &[ping(20.0), ping(20.0), ping(20.0)])
        .await
        .unwrap();
    let jittery = engine
        .update("a1", "l2", &[ping(5.0), ping(80.0), ping(10.0)])
        .await
        .unwrap();
    assert_eq!(jittery.total_probe_count, 30);
    assert_eq!(jittery.version, 1);

    let stored = engine.store().get_summary("a1", "l2").await.unwrap().unwrap();
    assert!(approx_eq(stored.mean_delay.value, jittery.mean_delay.value));

    // default_num 2 at ratio 0.5: one ranked pick (highest variance) then one blind.
    let s = engine.schedule_round("a1").await.unwrap();
    assert_eq!(s.len(), 2);
    assert_eq!(s.entries[0].target_id, "l2");
    assert_eq!(s.entries[0].selection, Selection::Ranked);
    assert_eq!(s.entries[1].selection, Selection::Blind);
    assert_ne!(s.entries[1].target_id, "l2");
    assert_ne!(s.entries[1].target_id, "a1");
}

#[tokio::test]
async fn beacons_feed_active_peers() {
    let (_dir, store) = sqlite_store().await;
    let config = AppConfig::load_from_str(CONFIG).unwrap();
    let engine = MeasurementEngine::new(store, &config);

    engine.register(&Entity::peer("a1", "old")).await.unwrap();
    engine.register(&Entity::peer("a2", "h")).await.unwrap();
    engine.beacon("a1", "new").await.unwrap();

    let active = engine.active_peers().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "a1");
    assert_eq!(active[0].host, "new");

    let err = engine.beacon("ghost", "h").await.unwrap_err();
    assert!(matches!(err, CoreError::NoSuchAgent(_)));
}

#[tokio::test]
async fn schedule_agents_reports_each_agent() {
    let (_dir, store) = sqlite_store().await;
    let config = AppConfig::load_from_str(CONFIG).unwrap();
    let engine = MeasurementEngine::with_rng(store, &config, StdRng::seed_from_u64(3));

    engine.register(&Entity::peer("a1", "h")).await.unwrap();
    engine.register(&Entity::peer("a2", "h")).await.unwrap();
    engine.register(&Entity::landmark("l1", "h")).await.unwrap();

    let ids = vec!["a1".to_string(), "ghost".to_string(), "a2".to_string()];
    let results = engine.schedule_agents(&ids).await;
    assert_eq!(results.len(), 3);

    let a1 = results[0].as_ref().unwrap();
    assert_eq!(a1.agent_id, "a1");
    assert_eq!(a1.len(), 2);
    assert!(!a1.target_ids().contains(&"a1"));
    assert!(matches!(results[1], Err(CoreError::NoSuchAgent(_))));
    assert_eq!(results[2].as_ref().unwrap().agent_id, "a2");
}

#[tokio::test]
async fn malformed_only_batch_leaves_store_untouched() {
    let (_dir, store) = sqlite_store().await;
    let config = AppConfig::load_from_str(CONFIG).unwrap();
    let engine = MeasurementEngine::new(store, &config);
    engine.register(&Entity::peer("a1", "h")).await.unwrap();

    let err = engine
        .update("a1", "l1", &[RawResult::ping(2, 3, 1.0, 1.0, 1.0, vec![])])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EmptyBatch { .. }));
    assert!(!err.is_retryable());
    assert!(engine.store().get_summary("a1", "l1").await.unwrap().is_none());
}
