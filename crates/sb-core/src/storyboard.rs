//! Storyboard data model: scene plans, clips, and generation status.
//!
//! A [`Storyboard`] is the full job state persisted at every checkpoint. It
//! embeds the [`ScenePlan`] verbatim so that a resumed run never has to
//! consult the decomposition service again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{ClipId, StoryboardId};

// ---------------------------------------------------------------------------
// ProviderId
// ---------------------------------------------------------------------------

/// Identifier of the model provider used by the external services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// ScenePlan
// ---------------------------------------------------------------------------

/// One unit of requested generation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Identifier assigned by the decomposition service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub prompt: String,
    pub target_duration_seconds: f64,
}

/// Immutable, ordered list of scenes obtained once from the decomposition
/// service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenePlan {
    scenes: Vec<SceneDescription>,
}

impl ScenePlan {
    pub fn new(scenes: Vec<SceneDescription>) -> Self {
        Self { scenes }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn scenes(&self) -> &[SceneDescription] {
        &self.scenes
    }

    /// Scenes at and after `cursor`, paired with their absolute index.
    pub fn remaining(&self, cursor: usize) -> impl Iterator<Item = (usize, &SceneDescription)> {
        self.scenes.iter().enumerate().skip(cursor)
    }
}

// ---------------------------------------------------------------------------
// Clip
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One turn of the exchange with the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// The durable result of one successfully generated scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub name: String,
    /// Rendered content returned by the generation service.
    pub content: String,
    pub duration_seconds: f64,
    /// Absolute scene index assigned at dispatch time. This, not completion
    /// order, is the sequencing key.
    pub order: usize,
    pub prompt: String,
    pub dialogue_history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_content_id: Option<String>,
    pub provider: ProviderId,
}

// ---------------------------------------------------------------------------
// GenerationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub in_progress: bool,
    pub started_at: DateTime<Utc>,
    pub total_scenes: usize,
    /// Only ever raised after the clip has been merged into the storyboard.
    pub completed_scenes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationStatus {
    pub fn started(total_scenes: usize) -> Self {
        Self {
            in_progress: true,
            started_at: Utc::now(),
            total_scenes,
            completed_scenes: 0,
            completed_at: None,
            error: None,
        }
    }
}

/// Failure of a single scene, keyed by its absolute index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneError {
    pub index: usize,
    pub message: String,
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene {}: {}", self.index, self.message)
    }
}

// ---------------------------------------------------------------------------
// Storyboard
// ---------------------------------------------------------------------------

/// The full state of one generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Storyboard {
    pub id: StoryboardId,
    pub name: String,
    pub description: String,
    /// Completed clips, kept sorted by `order`.
    pub clips: Vec<Clip>,
    /// Absent in checkpoints written before plans were stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ScenePlan>,
    pub provider: ProviderId,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Storyboard {
    /// Create a fresh, in-progress storyboard for `plan`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        provider: ProviderId,
        plan: ScenePlan,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: StoryboardId::new(),
            name: name.into(),
            description: description.into(),
            clips: Vec::new(),
            status: GenerationStatus::started(plan.len()),
            plan: Some(plan),
            provider,
            created_at: now,
            updated_at: now,
        }
    }

    /// Scene index at which a resumed run starts dispatching.
    ///
    /// This is the persisted clip count, not an independently tracked index.
    pub fn resume_cursor(&self) -> usize {
        self.clips.len()
    }

    /// Whether a clip for scene `order` has already been merged.
    pub fn has_clip(&self, order: usize) -> bool {
        self.clips.binary_search_by_key(&order, |c| c.order).is_ok()
    }

    /// Sum of clip durations in seconds.
    pub fn total_duration_seconds(&self) -> f64 {
        self.clips.iter().map(|c| c.duration_seconds).sum()
    }
}
