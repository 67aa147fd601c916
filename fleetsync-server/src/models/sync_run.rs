use crate::sync::{ExecutionResult, Plan};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub plan_id: String,
    pub mode: String,
    pub source_server: String,
    pub target_server: String,
    pub roots: Vec<String>,
    pub status: String,
    pub ok: bool,
    pub result: Option<serde_json::Value>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

fn row_to_run(row: &Row) -> rusqlite::Result<SyncRun> {
    let roots: String = row.get("roots")?;
    let result: Option<String> = row.get("result_json")?;
    Ok(SyncRun {
        id: row.get("id")?,
        plan_id: row.get("plan_id")?,
        mode: row.get("mode")?,
        source_server: row.get("source_server")?,
        target_server: row.get("target_server")?,
        roots: serde_json::from_str(&roots).unwrap_or_default(),
        status: row.get("status")?,
        ok: row.get::<_, i64>("ok")? != 0,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
    })
}

pub fn find_recent(conn: &Connection, limit: u32) -> anyhow::Result<Vec<SyncRun>> {
    let mut stmt = conn.prepare("SELECT * FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?")?;
    let rows = stmt.query_map(params![limit], row_to_run)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<SyncRun>> {
    let mut stmt = conn.prepare("SELECT * FROM sync_runs WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_run)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

/// Record that execution of `plan` has started.
pub fn start(conn: &Connection, plan_id: &str, plan: &Plan) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sync_runs (id, plan_id, mode, source_server, target_server, roots, status, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running', ?7)",
        params![
            id,
            plan_id,
            plan.mode.as_str(),
            plan.source_server,
            plan.target_server,
            serde_json::to_string(&plan.roots)?,
            now
        ],
    )?;
    Ok(id)
}

pub fn finish(conn: &Connection, id: &str, result: &ExecutionResult) -> anyhow::Result<()> {
    let status = if result.ok { "completed" } else { "failed" };
    conn.execute(
        "UPDATE sync_runs SET status = ?1, ok = ?2, result_json = ?3, finished_at = ?4 WHERE id = ?5",
        params![
            status,
            result.ok as i64,
            serde_json::to_string(result)?,
            chrono::Utc::now().to_rfc3339(),
            id
        ],
    )?;
    Ok(())
}
