//! SQLite connection pools for the checkpoint database.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use sb_core::{Error, Result};

use crate::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Connections held by one process. Checkpoints come from a single writer,
/// the rest is headroom for CLI reads.
const POOL_SIZE: u32 = 4;

/// How long a checkpoint write waits on another connection's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `init_pool` waits for its first connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the checkpoint database at `db_path` and run migrations.
///
/// Missing parent directories are created. Every connection gets WAL
/// journaling, foreign keys and a busy timeout.
pub fn init_pool(db_path: &Path) -> Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;",
        )
    });
    build(manager, db_path.display())
}

/// Fresh in-memory database. Each call gets its own shared-cache name, so
/// pools never see each other while connections of one pool share state.
pub fn init_memory_pool() -> Result<DbPool> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let uri = format!("file:storyforge_checkpoints_{n}?mode=memory&cache=shared");

    let manager = SqliteConnectionManager::file(&uri)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    build(manager, uri)
}

fn build(manager: SqliteConnectionManager, label: impl std::fmt::Display) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(POOL_SIZE)
        .connection_timeout(CONNECT_TIMEOUT)
        .build(manager)
        .map_err(|e| Error::database(format!("cannot open checkpoint database {label}: {e}")))?;

    migrations::run_migrations(&*get_conn(&pool)?)?;
    Ok(pool)
}

pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("checkpoint database unavailable: {e}")))
}
