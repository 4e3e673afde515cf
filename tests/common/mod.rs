// Shared test helpers

#![allow(dead_code)]

use std::sync::Arc;

use netprobe::models::*;
use netprobe::store::{MemoryStore, SqliteStore, StatsStore};
use tempfile::TempDir;

/// Ping report with avg_rtt = `avg`, extrema +-1 and a three-sample delay sequence.
pub fn ping(avg: f64) -> RawResult {
    RawResult::ping(10, 0, avg - 1.0, avg, avg + 1.0, vec![avg - 1.0, avg, avg + 1.0])
}

pub fn lossy_ping(probe_count: u64, packet_loss: u64, avg: f64) -> RawResult {
    RawResult::ping(probe_count, packet_loss, avg, avg, avg, vec![avg])
}

/// Memory store with the given peers and landmarks registered.
pub async fn memory_store(peers: &[&str], landmarks: &[&str]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    register_all(store.as_ref(), peers, landmarks).await;
    store
}

/// Fresh SQLite store in a temp dir. Keep the TempDir alive for the test's duration.
pub async fn sqlite_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("netprobe.db");
    let store = SqliteStore::connect(path.to_str().unwrap(), 4).await.unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

pub async fn register_all<S: StatsStore>(store: &S, peers: &[&str], landmarks: &[&str]) {
    for id in peers {
        store
            .register_entity(&Entity::peer(*id, format!("{id}.example.net")))
            .await
            .unwrap();
    }
    for id in landmarks {
        store
            .register_entity(&Entity::landmark(*id, format!("{id}.example.net")))
            .await
            .unwrap();
    }
}

/// Summary for (agent, target) whose delay variance is `variance`.
pub fn summary_with_variance(agent: &str, target: &str, variance: f64) -> StatSummary {
    let mut s = StatSummary::cold(agent, target);
    s.mean_delay = Estimate {
        value: 20.0,
        variance,
        std_dev: variance.sqrt(),
    };
    s.total_probe_count = 10;
    s.version = 1;
    s
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
