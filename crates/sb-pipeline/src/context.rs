//! Execution context shared by a pipeline run.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use sb_core::events::EventBus;

/// Progress tuple emitted after every merge.
///
/// `current` never decreases within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    /// Resume cursor when the run continues an earlier one.
    pub resumed_from: Option<usize>,
}

/// Sender for reporting progress to the caller.
pub struct ProgressSender {
    callback: Box<dyn Fn(Progress) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a no-op sender that discards all progress reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_| {}),
        }
    }

    /// Report progress.
    pub fn send(&self, progress: Progress) {
        (self.callback)(progress);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// Notification channels and abort signal for a run.
#[derive(Clone)]
pub struct RunContext {
    /// Event bus receiving scene and lifecycle events.
    pub events: Arc<EventBus>,
    /// Once cancelled, no new scene is dispatched. Scenes already sent to
    /// the generation service still settle and are merged.
    pub cancellation: CancellationToken,
    /// Progress notifier.
    pub progress: Arc<ProgressSender>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            events: Arc::new(EventBus::default()),
            cancellation: CancellationToken::new(),
            progress: Arc::new(ProgressSender::noop()),
        }
    }

    /// Builder: share an existing event bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builder: attach a progress sender.
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Arc::new(progress);
        self
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
