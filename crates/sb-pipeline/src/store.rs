//! Checkpoint storage boundary.
//!
//! A [`CheckpointStore`] persists full storyboard snapshots. The id it
//! returns from [`CheckpointStore::write`] is canonical: callers must use it
//! for every later read and write, even when it differs from the id they
//! proposed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use sb_core::{Error, Result, Storyboard, StoryboardId};
use sb_db::pool::{get_conn, DbPool};
use sb_db::queries::storyboards;

/// Durable storage for storyboard checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a full snapshot; returns the canonical id it is stored under.
    async fn write(&self, storyboard: &Storyboard) -> Result<StoryboardId>;

    /// Load the latest snapshot for `id`, or `None` if it does not exist.
    async fn read(&self, id: StoryboardId) -> Result<Option<Storyboard>>;

    /// Ids of every storyboard whose status is still in progress.
    async fn list_in_progress(&self) -> Result<Vec<StoryboardId>>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// [`CheckpointStore`] backed by the sb-db SQLite pool.
pub struct SqliteCheckpointStore {
    pool: DbPool,
    assign_ids: bool,
}

impl SqliteCheckpointStore {
    /// `assign_ids` makes the store pick its own canonical id on the first
    /// write of each storyboard.
    pub fn new(pool: DbPool, assign_ids: bool) -> Self {
        Self { pool, assign_ids }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn write(&self, storyboard: &Storyboard) -> Result<StoryboardId> {
        let conn = get_conn(&self.pool)?;
        storyboards::save_snapshot(&conn, storyboard, self.assign_ids)
    }

    async fn read(&self, id: StoryboardId) -> Result<Option<Storyboard>> {
        let conn = get_conn(&self.pool)?;
        storyboards::load_snapshot(&conn, id)
    }

    async fn list_in_progress(&self) -> Result<Vec<StoryboardId>> {
        let conn = get_conn(&self.pool)?;
        storyboards::list_in_progress(&conn)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    rows: HashMap<StoryboardId, Storyboard>,
    aliases: HashMap<StoryboardId, StoryboardId>,
    write_log: Vec<StoryboardId>,
    read_log: Vec<StoryboardId>,
}

impl MemoryInner {
    fn resolve(&self, id: StoryboardId) -> Option<StoryboardId> {
        if self.rows.contains_key(&id) {
            Some(id)
        } else {
            self.aliases.get(&id).copied()
        }
    }
}

/// Process-local [`CheckpointStore`] with the same canonical-id behaviour as
/// the SQLite store. Records the ids it was called with.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<MemoryInner>,
    assign_ids: bool,
    fail_writes: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: assign a fresh canonical id on the first write of each
    /// storyboard.
    pub fn with_assigned_ids(mut self) -> Self {
        self.assign_ids = true;
        self
    }

    /// Make every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Ids passed to `write`, in call order.
    pub fn write_log(&self) -> Vec<StoryboardId> {
        self.inner.lock().write_log.clone()
    }

    /// Ids passed to `read`, in call order.
    pub fn read_log(&self) -> Vec<StoryboardId> {
        self.inner.lock().read_log.clone()
    }

    /// Latest stored snapshot, bypassing the read log.
    pub fn snapshot(&self, id: StoryboardId) -> Option<Storyboard> {
        let inner = self.inner.lock();
        inner.resolve(id).and_then(|c| inner.rows.get(&c).cloned())
    }

    /// Store `storyboard` verbatim under its own id (seeding a checkpoint
    /// left behind by an earlier process).
    pub fn insert(&self, storyboard: Storyboard) {
        self.inner.lock().rows.insert(storyboard.id, storyboard);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn write(&self, storyboard: &Storyboard) -> Result<StoryboardId> {
        let mut inner = self.inner.lock();
        let proposed = storyboard.id;
        inner.write_log.push(proposed);

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::database("checkpoint store unavailable"));
        }

        let canonical = match inner.resolve(proposed) {
            Some(id) => id,
            None if self.assign_ids => {
                let id = StoryboardId::new();
                inner.aliases.insert(proposed, id);
                id
            }
            None => proposed,
        };

        let mut snapshot = storyboard.clone();
        snapshot.id = canonical;
        inner.rows.insert(canonical, snapshot);
        Ok(canonical)
    }

    async fn read(&self, id: StoryboardId) -> Result<Option<Storyboard>> {
        let mut inner = self.inner.lock();
        inner.read_log.push(id);
        Ok(inner.resolve(id).and_then(|c| inner.rows.get(&c).cloned()))
    }

    async fn list_in_progress(&self) -> Result<Vec<StoryboardId>> {
        let inner = self.inner.lock();
        let mut ids: Vec<_> = inner
            .rows
            .values()
            .filter(|sb| sb.status.in_progress)
            .map(|sb| (sb.created_at, sb.id))
            .collect();
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }
}
