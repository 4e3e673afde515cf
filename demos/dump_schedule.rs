// Print a schedule for one agent from an existing database, one target id per line.
//
// Usage: cargo run --example dump_schedule -- AGENT_ID [NUM] [DB_PATH]
//   NUM      default: 1
//   DB_PATH  default: ./data/netprobe.db

use std::env;
use std::sync::Arc;

use netprobe::config::SchedulerConfig;
use netprobe::scheduler::TargetScheduler;
use netprobe::store::SqliteStore;

const DEFAULT_DB_PATH: &str = "./data/netprobe.db";

#[derive(Debug, PartialEq)]
struct Args {
    agent_id: String,
    num: usize,
    db_path: String,
}

/// Parse `AGENT_ID [NUM] [DB_PATH]` (program name already stripped).
fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let Some(agent_id) = args.first() else {
        anyhow::bail!("usage: dump_schedule AGENT_ID [NUM] [DB_PATH]");
    };
    let num = match args.get(1) {
        Some(s) => s
            .parse()
            .map_err(|e| anyhow::anyhow!("NUM must be a count, got {:?}: {}", s, e))?,
        None => 1,
    };
    let db_path = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
    Ok(Args {
        agent_id: agent_id.clone(),
        num,
        db_path,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let raw: Vec<String> = env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    let store = Arc::new(SqliteStore::connect(&args.db_path, 1).await?);
    store.init().await?;
    let scheduler = TargetScheduler::new(store, SchedulerConfig::default());
    let schedule = scheduler.get_schedule(&args.agent_id, args.num).await?;

    if schedule.is_empty() {
        println!("Nothing scheduled");
    }
    for target_id in schedule.target_ids() {
        println!("{target_id}");
    }
    Ok(())
}
