//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! storage, service and pipeline sections. Every section defaults sensibly
//! so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub decomposition: ServiceConfig,
    pub generation: ServiceConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, svc) in [
            ("decomposition", &self.decomposition),
            ("generation", &self.generation),
        ] {
            if svc.base_url.is_empty() {
                warnings.push(format!("{name}.base_url is empty"));
            } else if !svc.base_url.starts_with("http://") && !svc.base_url.starts_with("https://")
            {
                warnings.push(format!(
                    "{name}.base_url '{}' is not an http(s) URL",
                    svc.base_url
                ));
            }
            if svc.timeout_secs == 0 {
                warnings.push(format!("{name}.timeout_secs is 0; requests will never time out"));
            }
        }

        if self.pipeline.default_provider.is_empty() {
            warnings.push("pipeline.default_provider is empty".into());
        }

        if self.pipeline.content_marker.as_deref() == Some("") {
            warnings.push(
                "pipeline.content_marker is an empty string; use null to disable the marker check"
                    .into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Checkpoint storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// When set, the store assigns its own canonical id on the first write
    /// of a storyboard instead of keeping the proposed one.
    pub store_assigned_ids: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/storyforge.db"),
            store_assigned_ids: true,
        }
    }
}

/// Connection settings for one external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    120
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".into(),
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Generation pipeline behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_provider: String,
    /// Upper bound on concurrently running scene tasks; 0 dispatches every
    /// remaining scene at once.
    pub max_concurrent_scenes: usize,
    /// Delay before the single retry of a transient scene failure.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Marker that generated content must contain; `None` disables the check.
    #[serde(default = "default_content_marker")]
    pub content_marker: Option<String>,
    /// Resume every in-progress storyboard before starting a new run.
    pub resume_on_start: bool,
}

fn default_retry_backoff() -> u64 {
    1000
}

/// Marker generated scene content must contain unless configured otherwise.
pub const DEFAULT_CONTENT_MARKER: &str = "<svg";

fn default_content_marker() -> Option<String> {
    Some(DEFAULT_CONTENT_MARKER.into())
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".into(),
            max_concurrent_scenes: 0,
            retry_backoff_ms: default_retry_backoff(),
            content_marker: default_content_marker(),
            resume_on_start: false,
        }
    }
}
