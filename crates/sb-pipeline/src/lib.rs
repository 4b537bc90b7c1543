//! sb-pipeline: resumable scene generation.
//!
//! An [`Orchestrator`] decomposes a prompt into a [`ScenePlan`](sb_core::ScenePlan),
//! fans scene generation out through a [`SceneTaskRunner`], and funnels every
//! result through a single [`StateMerger`] that checkpoints the storyboard
//! after each committed scene. [`should_resume`] decides how a storyboard left
//! in progress by an earlier process is picked back up.

pub mod context;
pub mod merger;
pub mod orchestrator;
pub mod resume;
pub mod runner;
pub mod services;
pub mod store;

pub use context::{Progress, ProgressSender, RunContext};
pub use merger::StateMerger;
pub use orchestrator::{Orchestrator, RunRequest};
pub use resume::{should_resume, ResumeDecision};
pub use runner::{ContentValidator, RetryPolicy, SceneTaskRunner, TaskResult};
pub use services::{Decomposer, GeneratedScene, Generator, HttpDecomposer, HttpGenerator};
pub use store::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
