use crate::db::connection::DbPool;
use std::fs;
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_runs (
  id TEXT PRIMARY KEY,
  plan_id TEXT NOT NULL,
  mode TEXT NOT NULL,
  source_server TEXT NOT NULL,
  target_server TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'running' CHECK(status IN ('running','completed','failed')),
  ok INTEGER NOT NULL DEFAULT 0,
  result_json TEXT,
  started_at TEXT NOT NULL DEFAULT (datetime('now')),
  finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started_at ON sync_runs(started_at DESC);
"#;

pub fn migrate(pool: &DbPool, data_dir: &Path) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    fs::create_dir_all(data_dir)?;

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Idempotent migrations for existing databases
    let columns: Vec<String> = {
        let mut stmt = conn.prepare("PRAGMA table_info(sync_runs)")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        rows.filter_map(|r| r.ok()).collect()
    };
    if !columns.iter().any(|c| c == "roots") {
        conn.execute_batch("ALTER TABLE sync_runs ADD COLUMN roots TEXT NOT NULL DEFAULT '[]'")?;
    }

    // Runs left behind by a crash can never finish.
    let abandoned = conn.execute(
        "UPDATE sync_runs SET status = 'failed', finished_at = datetime('now') WHERE status = 'running'",
        [],
    )?;
    if abandoned > 0 {
        tracing::warn!(abandoned, "[DB] Marked interrupted sync runs as failed");
    }

    tracing::info!("[DB] Migration complete");
    Ok(())
}
