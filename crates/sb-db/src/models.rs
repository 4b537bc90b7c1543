//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`.

use uuid::Uuid;

use sb_core::StoryboardId;

/// Parse a UUID-based ID from a text column.
pub(crate) fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(T::from(uuid))
}

// ---------------------------------------------------------------------------
// StoryboardSummary
// ---------------------------------------------------------------------------

/// Scalar columns of a `storyboards` row, without the snapshot payload.
#[derive(Debug, Clone)]
pub struct StoryboardSummary {
    pub id: StoryboardId,
    pub name: String,
    pub provider: String,
    pub in_progress: bool,
    pub total_scenes: i64,
    pub completed_scenes: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl StoryboardSummary {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            name: row.get(1)?,
            provider: row.get(2)?,
            in_progress: row.get(3)?,
            total_scenes: row.get(4)?,
            completed_scenes: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}
