//! Agent registry mirror and run history

use crate::types::RunCounters;
use localist_common::db::models::{AgentKind, AgentRun, AgentState, RunStatus};
use localist_common::{time, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert or refresh the persistent row for a registered agent
pub async fn register_agent(
    pool: &SqlitePool,
    name: &str,
    kind: AgentKind,
    schedule: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO agents (name, kind, status, schedule, registered_at)
        VALUES (?, ?, 'idle', ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            kind = excluded.kind,
            status = 'idle',
            schedule = excluded.schedule,
            registered_at = excluded.registered_at
        "#,
    )
    .bind(name)
    .bind(kind.as_str())
    .bind(schedule)
    .bind(time::now_db())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_agent_status(pool: &SqlitePool, name: &str, state: AgentState) -> Result<()> {
    sqlx::query("UPDATE agents SET status = ? WHERE name = ?")
        .bind(state.as_str())
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

/// Open a run row in `running` state and return its id
pub async fn start_run(pool: &SqlitePool, agent_name: &str) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = time::now_db();

    sqlx::query("INSERT INTO agent_runs (id, agent_name, status, started_at) VALUES (?, ?, 'running', ?)")
        .bind(&id)
        .bind(agent_name)
        .bind(&now)
        .execute(pool)
        .await?;

    sqlx::query("UPDATE agents SET last_run_at = ? WHERE name = ?")
        .bind(&now)
        .bind(agent_name)
        .execute(pool)
        .await?;

    Ok(id)
}

/// Close a run; only a `running` row can be finished
pub async fn finish_run(
    pool: &SqlitePool,
    run_id: &str,
    status: RunStatus,
    counters: &RunCounters,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE agent_runs SET
            status = ?, ended_at = ?, processed = ?, created = ?, updated = ?,
            failed = ?, skipped = ?, error_message = ?, warnings = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(status.as_str())
    .bind(time::now_db())
    .bind(counters.processed as i64)
    .bind(counters.created as i64)
    .bind(counters.updated as i64)
    .bind(counters.failed as i64)
    .bind(counters.skipped as i64)
    .bind(error_message)
    .bind(serde_json::to_string(&counters.warnings)?)
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(())
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AgentRun> {
    let status: String = row.get("status");
    let started_at: String = row.get("started_at");
    let warnings: String = row.get("warnings");

    Ok(AgentRun {
        id: row.get("id"),
        agent_name: row.get("agent_name"),
        status: RunStatus::parse(&status)?,
        started_at: time::from_db(&started_at)?,
        ended_at: time::from_db_opt(row.get("ended_at"))?,
        processed: row.get("processed"),
        created: row.get("created"),
        updated: row.get("updated"),
        failed: row.get("failed"),
        skipped: row.get("skipped"),
        error_message: row.get("error_message"),
        warnings: serde_json::from_str(&warnings)?,
    })
}

/// Run history for one agent, newest first
pub async fn runs_for_agent(pool: &SqlitePool, agent_name: &str, limit: i64) -> Result<Vec<AgentRun>> {
    let rows = sqlx::query(
        r#"
        SELECT id, agent_name, status, started_at, ended_at, processed, created, updated,
               failed, skipped, error_message, warnings
        FROM agent_runs
        WHERE agent_name = ?
        ORDER BY started_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(agent_name)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from_row).collect()
}

/// Runs left in `running` by a process that died mid-run
pub async fn fail_orphaned_runs(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agent_runs SET status = 'failed', ended_at = ?, error_message = 'interrupted by restart'
        WHERE status = 'running'
        "#,
    )
    .bind(time::now_db())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<AgentRun> {
    let row = sqlx::query(
        r#"
        SELECT id, agent_name, status, started_at, ended_at, processed, created, updated,
               failed, skipped, error_message, warnings
        FROM agent_runs
        WHERE id = ?
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| localist_common::Error::NotFound(format!("agent run '{}'", run_id)))?;

    run_from_row(&row)
}
