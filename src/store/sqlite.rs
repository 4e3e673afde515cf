// SQLite StatsStore. Uses sqlx for async + connection pooling, WAL journal.
//
// Tables:
//   entities        one row per probe target (peer or landmark)
//   target_totals   per (agent, target): counters, extrema, version
//   stat_estimates  per (agent, target, metric): value, variance, std_dev
//   raw_results     append-only raw log; delay samples stored as versioned wincode BLOB
//
// A summary is target_totals + its stat_estimates rows. Both are written in one transaction
// and read inside one read transaction, so a reader sees both halves of the same commit.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::instrument;

use super::{StatsStore, blob};
use crate::error::{CoreError, CoreResult};
use crate::models::{Entity, EntityRole, Estimate, LoggedResult, MetricKind, ProbeOutcome, StatSummary};

const ENTITY_COLUMNS: &str = "id, role, host, registered_at, last_seen";
const TOTALS_COLUMNS: &str =
    "agent_id, target_id, total_probe_count, total_packet_loss, max_rtt, min_rtt, version, updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to SQLite at `path`, create parent dir and DB if missing, enable WAL + pragmas.
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                host TEXT NOT NULL,
                registered_at INTEGER NOT NULL,
                last_seen INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_last_seen ON entities(last_seen)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS target_totals (
                agent_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                total_probe_count INTEGER NOT NULL,
                total_packet_loss INTEGER NOT NULL,
                max_rtt REAL,
                min_rtt REAL,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (agent_id, target_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stat_estimates (
                agent_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                metric TEXT NOT NULL,
                value REAL NOT NULL,
                variance REAL NOT NULL,
                std_dev REAL NOT NULL,
                PRIMARY KEY (agent_id, target_id, metric)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                probe_count INTEGER NOT NULL,
                packet_loss INTEGER NOT NULL,
                min_rtt REAL NOT NULL,
                avg_rtt REAL NOT NULL,
                max_rtt REAL NOT NULL,
                delay_data BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_results_agent_recorded ON raw_results(agent_id, recorded_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_results_recorded ON raw_results(recorded_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reclaim space after deletes (run periodically after pruning).
    #[instrument(skip(self), fields(repo = "stats", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    fn parse_entity_row(row: &SqliteRow) -> CoreResult<Option<Entity>> {
        let id: String = row.try_get("id")?;
        let role: String = row.try_get("role")?;
        let Some(role) = EntityRole::parse(&role) else {
            tracing::warn!(entity_id = %id, role = %role, "unknown entity role, skipping row");
            return Ok(None);
        };
        Ok(Some(Entity {
            id,
            role,
            host: row.try_get("host")?,
            registered_at: row.try_get("registered_at")?,
            last_seen: row.try_get("last_seen")?,
        }))
    }

    fn parse_entity_rows(rows: &[SqliteRow]) -> CoreResult<Vec<Entity>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(e) = Self::parse_entity_row(row)? {
                out.push(e);
            }
        }
        Ok(out)
    }

    fn parse_totals_row(row: &SqliteRow) -> CoreResult<StatSummary> {
        let mut summary = StatSummary::cold(
            row.try_get::<String, _>("agent_id")?,
            row.try_get::<String, _>("target_id")?,
        );
        summary.total_probe_count = row.try_get::<i64, _>("total_probe_count")? as u64;
        summary.total_packet_loss = row.try_get::<i64, _>("total_packet_loss")? as u64;
        summary.max_rtt = row.try_get("max_rtt")?;
        summary.min_rtt = row.try_get("min_rtt")?;
        summary.version = row.try_get::<i64, _>("version")? as u64;
        summary.updated_at = row.try_get("updated_at")?;
        Ok(summary)
    }

    /// Apply one stat_estimates row onto its summary. Unknown metrics are ignored.
    fn apply_estimate_row(summary: &mut StatSummary, row: &SqliteRow) -> CoreResult<()> {
        let metric: String = row.try_get("metric")?;
        let Some(kind) = MetricKind::parse(&metric) else {
            tracing::debug!(metric = %metric, "unknown metric kind, ignoring");
            return Ok(());
        };
        *summary.estimate_mut(kind) = Estimate {
            value: row.try_get("value")?,
            variance: row.try_get("variance")?,
            std_dev: row.try_get("std_dev")?,
        };
        Ok(())
    }

    fn parse_raw_row(row: &SqliteRow) -> CoreResult<LoggedResult> {
        let delay_data: Vec<u8> = row.try_get("delay_data")?;
        Ok(LoggedResult {
            agent_id: row.try_get("agent_id")?,
            target_id: row.try_get("target_id")?,
            outcome: ProbeOutcome {
                recorded_at_ms: row.try_get("recorded_at")?,
                probe_count: row.try_get::<i64, _>("probe_count")? as u64,
                packet_loss: row.try_get::<i64, _>("packet_loss")? as u64,
                min_rtt: row.try_get("min_rtt")?,
                avg_rtt: row.try_get("avg_rtt")?,
                max_rtt: row.try_get("max_rtt")?,
                delays: blob::decode_delays(&delay_data),
            },
        })
    }
}

/// Counters, extrema and every estimate of one summary. Caller owns the transaction.
async fn write_summary(conn: &mut SqliteConnection, s: &StatSummary) -> CoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO target_totals
        (agent_id, target_id, total_probe_count, total_packet_loss, max_rtt, min_rtt, version, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT(agent_id, target_id) DO UPDATE SET
            total_probe_count = excluded.total_probe_count,
            total_packet_loss = excluded.total_packet_loss,
            max_rtt = excluded.max_rtt,
            min_rtt = excluded.min_rtt,
            version = excluded.version,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&s.agent_id)
    .bind(&s.target_id)
    .bind(s.total_probe_count as i64)
    .bind(s.total_packet_loss as i64)
    .bind(s.max_rtt)
    .bind(s.min_rtt)
    .bind(s.version as i64)
    .bind(s.updated_at)
    .execute(&mut *conn)
    .await?;

    for kind in MetricKind::ALL {
        let e = s.estimate(kind);
        sqlx::query(
            r#"
            INSERT INTO stat_estimates (agent_id, target_id, metric, value, variance, std_dev)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(agent_id, target_id, metric) DO UPDATE SET
                value = excluded.value,
                variance = excluded.variance,
                std_dev = excluded.std_dev
            "#,
        )
        .bind(&s.agent_id)
        .bind(&s.target_id)
        .bind(kind.as_str())
        .bind(e.value)
        .bind(e.variance)
        .bind(e.std_dev)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_raw_results(
    conn: &mut SqliteConnection,
    agent_id: &str,
    target_id: &str,
    results: &[ProbeOutcome],
) -> CoreResult<()> {
    for o in results {
        let delay_data = blob::encode_delays(&o.delays)?;
        sqlx::query(
            "INSERT INTO raw_results (agent_id, target_id, recorded_at, probe_count, packet_loss, min_rtt, avg_rtt, max_rtt, delay_data) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(agent_id)
        .bind(target_id)
        .bind(o.recorded_at_ms)
        .bind(o.probe_count as i64)
        .bind(o.packet_loss as i64)
        .bind(o.min_rtt)
        .bind(o.avg_rtt)
        .bind(o.max_rtt)
        .bind(&delay_data)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl StatsStore for SqliteStore {
    #[instrument(skip(self), fields(repo = "stats", operation = "get_entity"))]
    async fn get_entity(&self, id: &str) -> CoreResult<Option<Entity>> {
        let row = sqlx::query(&format!("SELECT {} FROM entities WHERE id = $1", ENTITY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Self::parse_entity_row(&row),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, entity), fields(repo = "stats", operation = "register_entity", entity_id = %entity.id))]
    async fn register_entity(&self, entity: &Entity) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (id, role, host, registered_at, last_seen)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(id) DO UPDATE SET host = excluded.host
            "#,
        )
        .bind(&entity.id)
        .bind(entity.role.as_str())
        .bind(&entity.host)
        .bind(entity.registered_at)
        .bind(entity.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "peer_beacon"))]
    async fn peer_beacon(&self, id: &str, host: &str, last_seen_ms: i64) -> CoreResult<()> {
        let r = sqlx::query(
            "UPDATE entities SET host = $2, last_seen = MAX(COALESCE(last_seen, $3), $3) WHERE id = $1 AND role = $4",
        )
        .bind(id)
        .bind(host)
        .bind(last_seen_ms)
        .bind(EntityRole::Peer.as_str())
        .execute(&self.pool)
        .await?;
        if r.rows_affected() == 0 {
            return Err(CoreError::NoSuchAgent(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "active_peers"))]
    async fn active_peers(&self, since_ms: i64) -> CoreResult<Vec<Entity>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entities WHERE role = $1 AND last_seen > $2 ORDER BY id ASC",
            ENTITY_COLUMNS
        ))
        .bind(EntityRole::Peer.as_str())
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await?;
        Self::parse_entity_rows(&rows)
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "get_catalog"))]
    async fn get_catalog(&self, exclude_id: Option<&str>) -> CoreResult<Vec<Entity>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM entities WHERE ($1 IS NULL OR id <> $1) ORDER BY id ASC",
            ENTITY_COLUMNS
        ))
        .bind(exclude_id)
        .fetch_all(&self.pool)
        .await?;
        Self::parse_entity_rows(&rows)
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "get_summary"))]
    async fn get_summary(&self, agent_id: &str, target_id: &str) -> CoreResult<Option<StatSummary>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM target_totals WHERE agent_id = $1 AND target_id = $2",
            TOTALS_COLUMNS
        ))
        .bind(agent_id)
        .bind(target_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let mut summary = Self::parse_totals_row(&row)?;

        let estimates = sqlx::query(
            "SELECT metric, value, variance, std_dev FROM stat_estimates WHERE agent_id = $1 AND target_id = $2",
        )
        .bind(agent_id)
        .bind(target_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        for row in &estimates {
            Self::apply_estimate_row(&mut summary, row)?;
        }
        Ok(Some(summary))
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "get_all_summaries"))]
    async fn get_all_summaries(&self, agent_id: &str) -> CoreResult<BTreeMap<String, StatSummary>> {
        let mut tx = self.pool.begin().await?;

        let totals = sqlx::query(&format!(
            "SELECT {} FROM target_totals WHERE agent_id = $1",
            TOTALS_COLUMNS
        ))
        .bind(agent_id)
        .fetch_all(&mut *tx)
        .await?;

        let estimates = sqlx::query(
            "SELECT target_id, metric, value, variance, std_dev FROM stat_estimates WHERE agent_id = $1",
        )
        .bind(agent_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut out = BTreeMap::new();
        for row in &totals {
            let summary = Self::parse_totals_row(row)?;
            out.insert(summary.target_id.clone(), summary);
        }
        for row in &estimates {
            let target_id: String = row.try_get("target_id")?;
            // Estimates without a totals row are leftovers of a purge race; skip them.
            if let Some(summary) = out.get_mut(&target_id) {
                Self::apply_estimate_row(summary, row)?;
            }
        }
        Ok(out)
    }

    #[instrument(skip(self, summary), fields(repo = "stats", operation = "upsert_summary", agent_id = %summary.agent_id, target_id = %summary.target_id))]
    async fn upsert_summary(&self, summary: &StatSummary) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        write_summary(&mut tx, summary).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, results), fields(repo = "stats", operation = "append_raw_results", results_count = results.len()))]
    async fn append_raw_results(
        &self,
        agent_id: &str,
        target_id: &str,
        results: &[ProbeOutcome],
    ) -> CoreResult<()> {
        if results.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        insert_raw_results(&mut tx, agent_id, target_id, results).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, summary, results), fields(repo = "stats", operation = "commit_batch", agent_id = %summary.agent_id, target_id = %summary.target_id, results_count = results.len()))]
    async fn commit_batch(
        &self,
        summary: &StatSummary,
        expected_version: u64,
        results: &[ProbeOutcome],
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // Take the write lock before reading the version; a read-then-upgrade
        // fails with SQLITE_BUSY instead of waiting on busy_timeout.
        sqlx::query(
            "UPDATE target_totals SET version = version WHERE agent_id = $1 AND target_id = $2",
        )
        .bind(&summary.agent_id)
        .bind(&summary.target_id)
        .execute(&mut *tx)
        .await?;

        let stored = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM target_totals WHERE agent_id = $1 AND target_id = $2",
        )
        .bind(&summary.agent_id)
        .bind(&summary.target_id)
        .fetch_optional(&mut *tx)
        .await?
        .map_or(0, |v| v as u64);

        if stored != expected_version {
            // Dropping tx rolls back.
            return Err(CoreError::Conflict {
                agent_id: summary.agent_id.clone(),
                target_id: summary.target_id.clone(),
                expected: expected_version,
            });
        }

        write_summary(&mut tx, summary).await?;
        insert_raw_results(&mut tx, &summary.agent_id, &summary.target_id, results).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "recent_raw_results"))]
    async fn recent_raw_results(&self, agent_id: &str, limit: u32) -> CoreResult<Vec<LoggedResult>> {
        let rows = sqlx::query(
            "SELECT agent_id, target_id, recorded_at, probe_count, packet_loss, min_rtt, avg_rtt, max_rtt, delay_data
             FROM raw_results WHERE agent_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(agent_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::parse_raw_row(row)?);
        }
        out.reverse();
        Ok(out)
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "purge_results"))]
    async fn purge_results(&self, agent_id: &str) -> CoreResult<u64> {
        let r = sqlx::query("DELETE FROM raw_results WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "purge_results_older_than"))]
    async fn purge_results_older_than(&self, agent_id: &str, timestamp_ms: i64) -> CoreResult<u64> {
        let r = sqlx::query("DELETE FROM raw_results WHERE agent_id = $1 AND recorded_at < $2")
            .bind(agent_id)
            .bind(timestamp_ms)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "prune_raw_results_before"))]
    async fn prune_raw_results_before(&self, cutoff_ms: i64) -> CoreResult<u64> {
        let r = sqlx::query("DELETE FROM raw_results WHERE recorded_at < $1")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "purge_agent"))]
    async fn purge_agent(&self, agent_id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["raw_results", "stat_estimates", "target_totals"] {
            sqlx::query(&format!("DELETE FROM {} WHERE agent_id = $1", table))
                .bind(agent_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!(agent_id = %agent_id, "agent statistics purged");
        Ok(())
    }
}
