//! Single-writer owner of the storyboard under construction.
//!
//! Every mutation of a running [`Storyboard`] goes through [`StateMerger`].
//! Its methods take `&mut self`, so concurrent scene tasks can only reach it
//! through the one consumer loop that owns it.

use std::sync::Arc;

use chrono::Utc;

use sb_core::events::{EventBus, EventPayload};
use sb_core::{SceneError, Storyboard, StoryboardId};

use crate::context::Progress;
use crate::runner::TaskResult;
use crate::store::CheckpointStore;

pub struct StateMerger {
    storyboard: Storyboard,
    store: Arc<dyn CheckpointStore>,
    events: Arc<EventBus>,
    errors: Vec<SceneError>,
    /// Scenes settled so far, counting clips present before this run.
    settled: usize,
    resumed_from: Option<usize>,
    warning: Option<String>,
}

impl StateMerger {
    pub fn new(
        storyboard: Storyboard,
        store: Arc<dyn CheckpointStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let settled = storyboard.clips.len();
        Self {
            storyboard,
            store,
            events,
            errors: Vec::new(),
            settled,
            resumed_from: None,
            warning: None,
        }
    }

    /// Builder: mark this run as the continuation of an earlier one.
    pub fn with_resumed_from(mut self, cursor: usize) -> Self {
        self.resumed_from = Some(cursor);
        self
    }

    pub fn storyboard(&self) -> &Storyboard {
        &self.storyboard
    }

    /// Current id of the storyboard; canonical once a write has succeeded.
    pub fn id(&self) -> StoryboardId {
        self.storyboard.id
    }

    /// Scene failures recorded during this run, in settlement order.
    pub fn errors(&self) -> &[SceneError] {
        &self.errors
    }

    pub fn progress(&self) -> Progress {
        Progress {
            current: self.settled,
            total: self.storyboard.status.total_scenes,
            resumed_from: self.resumed_from,
        }
    }

    /// Record a warning on the status without failing the job. It is kept
    /// ahead of any scene failures when the storyboard is finalized.
    pub fn set_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        self.storyboard.status.error = Some(warning.clone());
        self.warning = Some(warning);
    }

    /// Write a checkpoint of the current state.
    ///
    /// Returns `false` if the write failed. A failed write leaves the run
    /// untouched; the next checkpoint carries the same data.
    pub async fn persist(&mut self) -> bool {
        self.storyboard.updated_at = Utc::now();
        let proposed = self.storyboard.id;
        match self.store.write(&self.storyboard).await {
            Ok(canonical) => {
                if canonical != proposed {
                    tracing::info!(
                        storyboard_id = %proposed,
                        canonical_id = %canonical,
                        "Adopting canonical storyboard id"
                    );
                    self.storyboard.id = canonical;
                    self.events.broadcast(EventPayload::StoryboardCanonicalized {
                        proposed,
                        canonical,
                    });
                }
                true
            }
            Err(e) => {
                tracing::warn!(storyboard_id = %proposed, error = %e, "Checkpoint write failed");
                false
            }
        }
    }

    /// Merge one settled scene.
    ///
    /// A clip is inserted at its `order` position and checkpointed before
    /// `completed_scenes` is observable by anyone else. A clip whose order is
    /// already present is dropped but still counts as settled. Failures are
    /// recorded and never abort the job.
    pub async fn apply(&mut self, result: TaskResult) -> Progress {
        let index = result.index;
        match result.outcome {
            Ok(clip) if self.storyboard.has_clip(clip.order) => {
                tracing::debug!(
                    storyboard_id = %self.storyboard.id,
                    scene = clip.order,
                    "Dropping duplicate clip"
                );
                self.settled += 1;
            }
            Ok(clip) => {
                let pos = self
                    .storyboard
                    .clips
                    .partition_point(|c| c.order < clip.order);
                self.storyboard.clips.insert(pos, clip);
                self.storyboard.status.completed_scenes = self.storyboard.clips.len();
                self.settled += 1;

                self.persist().await;
                self.events.broadcast(EventPayload::SceneCompleted {
                    storyboard_id: self.storyboard.id,
                    index,
                });
            }
            Err(e) => {
                tracing::warn!(
                    storyboard_id = %self.storyboard.id,
                    scene = index,
                    error = %e,
                    "Scene failed"
                );
                let message = e.to_string();
                self.events.broadcast(EventPayload::SceneFailed {
                    storyboard_id: self.storyboard.id,
                    index,
                    error: message.clone(),
                });
                self.errors.push(SceneError { index, message });
                self.settled += 1;
            }
        }

        let progress = self.progress();
        self.events.broadcast(EventPayload::GenerationProgress {
            storyboard_id: self.storyboard.id,
            current: progress.current,
            total: progress.total,
            resumed_from: progress.resumed_from,
        });
        progress
    }

    /// Move the storyboard to its terminal state and checkpoint it.
    ///
    /// The error summary covers this run's failures and every scene below
    /// the total that still has no clip, including scenes lost by an earlier
    /// interrupted run. Finalizing an already finalized storyboard rewrites
    /// the same snapshot and does not announce completion again.
    pub async fn finalize(&mut self) -> Storyboard {
        if !self.storyboard.status.in_progress {
            self.persist().await;
            return self.storyboard.clone();
        }

        let status = &mut self.storyboard.status;
        status.in_progress = false;
        status.completed_at = Some(Utc::now());
        status.completed_scenes = self.storyboard.clips.len();
        let summary = error_summary(&self.storyboard, &self.errors, true);
        self.storyboard.status.error = match (self.warning.take(), summary) {
            (Some(warning), Some(summary)) => Some(format!("{warning}; {summary}")),
            (warning, summary) => warning.or(summary),
        };

        self.persist().await;

        tracing::info!(
            storyboard_id = %self.storyboard.id,
            clips = self.storyboard.clips.len(),
            failed = self.errors.len(),
            "Generation finalized"
        );
        self.events.broadcast(EventPayload::GenerationCompleted {
            storyboard: Box::new(self.storyboard.clone()),
            errors: self.errors.clone(),
        });
        self.storyboard.clone()
    }

    /// Checkpoint an aborted run. The storyboard stays in progress so a later
    /// resume continues from its clip count; failures so far are written to
    /// the status so they survive the restart.
    pub async fn interrupt(&mut self) -> Storyboard {
        if let Some(summary) = error_summary(&self.storyboard, &self.errors, false) {
            self.storyboard.status.error = Some(summary);
        }
        self.persist().await;
        tracing::info!(
            storyboard_id = %self.storyboard.id,
            completed = self.storyboard.clips.len(),
            total = self.storyboard.status.total_scenes,
            "Generation interrupted"
        );
        self.events.broadcast(EventPayload::GenerationInterrupted {
            storyboard_id: self.storyboard.id,
            completed_scenes: self.storyboard.clips.len(),
            total_scenes: self.storyboard.status.total_scenes,
        });
        self.storyboard.clone()
    }
}

/// `"2 of 5 scenes failed: scene 1: ...; scene 3: ..."`, sorted by index.
///
/// With `gaps`, scenes below the total that have neither a clip nor a
/// recorded error are reported as not generated.
fn error_summary(storyboard: &Storyboard, errors: &[SceneError], gaps: bool) -> Option<String> {
    let mut failed = errors.to_vec();
    if gaps {
        let missing = (0..storyboard.status.total_scenes)
            .filter(|i| !storyboard.has_clip(*i) && !errors.iter().any(|e| e.index == *i))
            .map(|index| SceneError {
                index,
                message: "not generated".into(),
            })
            .collect::<Vec<_>>();
        failed.extend(missing);
    }
    if failed.is_empty() {
        return None;
    }
    failed.sort_by_key(|e| e.index);
    let details = failed
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Some(format!(
        "{} of {} scenes failed: {}",
        failed.len(),
        storyboard.status.total_scenes,
        details
    ))
}
