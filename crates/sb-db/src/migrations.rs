//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use sb_core::{Error, Result};

/// V1: storyboard snapshots.
///
/// The full storyboard is stored as JSON in `snapshot`; the scalar columns
/// mirror its status so listing does not have to decode every snapshot.
const V1_INITIAL: &str = r#"
CREATE TABLE storyboards (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    provider         TEXT NOT NULL,
    in_progress      INTEGER NOT NULL DEFAULT 1,
    total_scenes     INTEGER NOT NULL DEFAULT 0,
    completed_scenes INTEGER NOT NULL DEFAULT 0,
    snapshot         TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX idx_storyboards_in_progress ON storyboards(in_progress);
"#;

/// V2: proposed-id aliases for store-assigned canonical ids.
const V2_ALIASES: &str = r#"
CREATE TABLE storyboard_aliases (
    alias_id     TEXT PRIMARY KEY,
    canonical_id TEXT NOT NULL REFERENCES storyboards(id) ON DELETE CASCADE,
    created_at   TEXT NOT NULL
);

CREATE INDEX idx_storyboard_aliases_canonical ON storyboard_aliases(canonical_id);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL), (2, V2_ALIASES)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}
