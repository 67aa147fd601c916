use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn create_pool(db_path: &str) -> anyhow::Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path);
    let pool = Pool::builder().max_size(4).build(manager)?;

    // Configure pragmas on a fresh connection
    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = DELETE;
         PRAGMA synchronous = FULL;",
    )?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every connection of a memory manager is
/// its own database, so the pool is capped at one.
#[cfg(test)]
pub fn memory_pool() -> DbPool {
    Pool::builder()
        .max_size(1)
        .build(SqliteConnectionManager::memory())
        .unwrap()
}

pub fn close_pool(pool: &DbPool) {
    // Connections close when the pool drops; flush anything pending first.
    if let Ok(conn) = pool.get() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }
}
