//! Storyboard checkpoint operations.
//!
//! A storyboard row is keyed by its canonical id. When the store assigns
//! ids itself, the id proposed by the first write is kept as an alias so a
//! repeated write of the same logical job lands on the same row.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use sb_core::{Error, Result, Storyboard, StoryboardId};

use crate::models::{parse_id, StoryboardSummary};

const SUMMARY_COLS: &str = "id, name, provider, in_progress, total_scenes, completed_scenes,
    created_at, updated_at";

/// Resolve `id` to the canonical id of an existing storyboard, following an
/// alias if necessary.
pub fn resolve_id(conn: &Connection, id: StoryboardId) -> Result<Option<StoryboardId>> {
    conn.query_row(
        "SELECT id FROM storyboards WHERE id = ?1
         UNION ALL
         SELECT canonical_id FROM storyboard_aliases WHERE alias_id = ?1
         LIMIT 1",
        [id.to_string()],
        |row| parse_id(row, 0),
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// Persist a full snapshot and return the canonical id it is stored under.
///
/// If `storyboard.id` (or an alias of it) already exists, the row is
/// updated in place. Otherwise a new row is inserted under either the
/// proposed id or, when `assign_id` is set, a freshly generated one; in the
/// latter case the proposed id is recorded as an alias.
pub fn save_snapshot(
    conn: &Connection,
    storyboard: &Storyboard,
    assign_id: bool,
) -> Result<StoryboardId> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let proposed = storyboard.id;
    let existing = resolve_id(&tx, proposed)?;
    let canonical = match existing {
        Some(id) => id,
        None if assign_id => StoryboardId::new(),
        None => proposed,
    };

    let mut snapshot = storyboard.clone();
    snapshot.id = canonical;
    let json = serde_json::to_string(&snapshot)?;
    let now = Utc::now().to_rfc3339();

    if existing.is_some() {
        tx.execute(
            "UPDATE storyboards
             SET name = ?1, provider = ?2, in_progress = ?3, total_scenes = ?4,
                 completed_scenes = ?5, snapshot = ?6, updated_at = ?7
             WHERE id = ?8",
            rusqlite::params![
                snapshot.name,
                snapshot.provider.as_str(),
                snapshot.status.in_progress,
                snapshot.status.total_scenes as i64,
                snapshot.status.completed_scenes as i64,
                json,
                now,
                canonical.to_string(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    } else {
        tx.execute(
            "INSERT INTO storyboards (id, name, provider, in_progress, total_scenes,
                 completed_scenes, snapshot, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            rusqlite::params![
                canonical.to_string(),
                snapshot.name,
                snapshot.provider.as_str(),
                snapshot.status.in_progress,
                snapshot.status.total_scenes as i64,
                snapshot.status.completed_scenes as i64,
                json,
                now,
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        if canonical != proposed {
            tx.execute(
                "INSERT INTO storyboard_aliases (alias_id, canonical_id, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![proposed.to_string(), canonical.to_string(), now],
            )
            .map_err(|e| Error::database(e.to_string()))?;
        }
    }

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(canonical)
}

/// Load the latest snapshot for `id` (canonical or alias).
pub fn load_snapshot(conn: &Connection, id: StoryboardId) -> Result<Option<Storyboard>> {
    let Some(canonical) = resolve_id(conn, id)? else {
        return Ok(None);
    };

    let json: Option<String> = conn
        .query_row(
            "SELECT snapshot FROM storyboards WHERE id = ?1",
            [canonical.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    match json {
        Some(j) => Ok(Some(serde_json::from_str(&j)?)),
        None => Ok(None),
    }
}

/// Canonical ids of every storyboard whose status is still in progress.
pub fn list_in_progress(conn: &Connection) -> Result<Vec<StoryboardId>> {
    let mut stmt = conn
        .prepare("SELECT id FROM storyboards WHERE in_progress = 1 ORDER BY created_at ASC")
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| parse_id(row, 0))
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// List storyboard summaries, newest first.
pub fn list_storyboards(
    conn: &Connection,
    offset: i64,
    limit: i64,
) -> Result<Vec<StoryboardSummary>> {
    let q = format!(
        "SELECT {SUMMARY_COLS} FROM storyboards
         ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![limit, offset], StoryboardSummary::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Delete a storyboard (and its aliases). Returns whether a row was removed.
pub fn delete_storyboard(conn: &Connection, id: StoryboardId) -> Result<bool> {
    let Some(canonical) = resolve_id(conn, id)? else {
        return Ok(false);
    };
    let n = conn
        .execute(
            "DELETE FROM storyboards WHERE id = ?1",
            [canonical.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}
