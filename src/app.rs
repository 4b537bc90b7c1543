//! Wiring shared by the CLI commands: configuration, storage, event logging.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use sb_core::config::Config;
use sb_core::events::{EventBus, EventPayload};
use sb_db::pool::{init_pool, DbPool};
use sb_pipeline::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};

/// Environment variable consulted when a service has no `api_key`.
pub const API_KEY_ENV: &str = "STORYFORGE_API_KEY";

/// Load configuration and fill missing API keys from the environment.
pub fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    apply_env_overrides(&mut config, std::env::var(API_KEY_ENV).ok());
    config
}

/// Use `api_key` for every service that has none configured.
pub fn apply_env_overrides(config: &mut Config, api_key: Option<String>) {
    let Some(key) = api_key.filter(|k| !k.trim().is_empty()) else {
        return;
    };
    for svc in [&mut config.decomposition, &mut config.generation] {
        if svc.api_key.is_none() {
            svc.api_key = Some(key.clone());
        }
    }
}

/// Open the SQLite checkpoint database named by the config, creating it and
/// its directory on first use.
pub fn open_pool(config: &Config) -> Result<DbPool> {
    let db_path = &config.storage.db_path;
    let existed = db_path.exists();
    let pool = init_pool(db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    if existed {
        tracing::info!("Checkpoint database opened at {}", db_path.display());
    } else {
        tracing::info!("Checkpoint database created at {}", db_path.display());
    }
    Ok(pool)
}

/// Checkpoint store for a run: SQLite, or process memory when `ephemeral`.
pub fn open_store(config: &Config, ephemeral: bool) -> Result<Arc<dyn CheckpointStore>> {
    let assign = config.storage.store_assigned_ids;
    if ephemeral {
        let store = MemoryCheckpointStore::new();
        let store = if assign { store.with_assigned_ids() } else { store };
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(SqliteCheckpointStore::new(open_pool(config)?, assign)))
}

/// Log every pipeline event until the bus is dropped.
pub fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event.payload),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Event logger lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(payload: &EventPayload) {
    match payload {
        EventPayload::GenerationStarted {
            storyboard_id,
            total_scenes,
        } => tracing::info!(%storyboard_id, total_scenes, "Storyboard started"),
        EventPayload::GenerationResumed {
            storyboard_id,
            resumed_from,
            total_scenes,
        } => tracing::info!(%storyboard_id, resumed_from, total_scenes, "Storyboard resumed"),
        EventPayload::SceneCompleted {
            storyboard_id,
            index,
        } => tracing::debug!(%storyboard_id, scene = index, "Scene committed"),
        EventPayload::SceneFailed {
            storyboard_id,
            index,
            error,
        } => tracing::debug!(%storyboard_id, scene = index, %error, "Scene failed"),
        EventPayload::StoryboardCanonicalized {
            proposed,
            canonical,
        } => tracing::info!(%proposed, %canonical, "Storyboard id canonicalized"),
        EventPayload::GenerationProgress { .. }
        | EventPayload::GenerationCompleted { .. }
        | EventPayload::GenerationInterrupted { .. } => {}
    }
}
