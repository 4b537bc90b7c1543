//! Top-level driver for fresh and resumed generation runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use sb_core::config::Config;
use sb_core::events::EventPayload;
use sb_core::{Error, ProviderId, Result, ScenePlan, Storyboard, StoryboardId};

use crate::context::RunContext;
use crate::merger::StateMerger;
use crate::resume::{should_resume, ResumeDecision};
use crate::runner::{ContentValidator, RetryPolicy, SceneTaskRunner, TaskResult};
use crate::services::{Decomposer, Generator, HttpDecomposer, HttpGenerator};
use crate::store::CheckpointStore;

/// Longest storyboard name derived from a prompt, in characters.
const MAX_DERIVED_NAME: usize = 48;

/// Parameters of a fresh run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub prompt: String,
    /// Falls back to the orchestrator's default provider.
    pub provider: Option<ProviderId>,
    /// When `None` the decomposition service picks the scene count.
    pub scene_count_hint: Option<u32>,
    /// Falls back to a name derived from the prompt.
    pub name: Option<String>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_scene_count(mut self, count: u32) -> Self {
        self.scene_count_hint = Some(count);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Builds scene plans, dispatches scene tasks, and feeds their results
/// through a [`StateMerger`].
pub struct Orchestrator {
    decomposer: Arc<dyn Decomposer>,
    runner: SceneTaskRunner,
    store: Arc<dyn CheckpointStore>,
    default_provider: ProviderId,
    /// Zero dispatches every remaining scene at once.
    max_concurrent: usize,
}

impl Orchestrator {
    pub fn new(
        decomposer: Arc<dyn Decomposer>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            decomposer,
            runner: SceneTaskRunner::new(generator),
            store,
            default_provider: ProviderId::new("openai"),
            max_concurrent: 0,
        }
    }

    /// Wire HTTP services and runner settings from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn CheckpointStore>) -> Result<Self> {
        let decomposer = HttpDecomposer::from_config(&config.decomposition)?;
        let generator = HttpGenerator::from_config(&config.generation)?;
        let pipeline = &config.pipeline;

        let runner = SceneTaskRunner::new(Arc::new(generator))
            .with_retry(RetryPolicy::new(
                1,
                Duration::from_millis(pipeline.retry_backoff_ms),
            ))
            .with_validator(match pipeline.content_marker {
                Some(ref marker) => ContentValidator::new(marker.clone()),
                None => ContentValidator::non_empty(),
            });

        Ok(Self {
            decomposer: Arc::new(decomposer),
            runner,
            store,
            default_provider: ProviderId::new(pipeline.default_provider.clone()),
            max_concurrent: pipeline.max_concurrent_scenes,
        })
    }

    /// Builder: replace the scene task runner.
    pub fn with_runner(mut self, runner: SceneTaskRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Builder: provider used when a request names none.
    pub fn with_default_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.default_provider = provider.into();
        self
    }

    /// Builder: cap the number of scenes in flight (0 = unbounded).
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Start a new job.
    ///
    /// Returns the storyboard as it stands when the run ends; its `id` is the
    /// canonical job id. A decomposition failure is returned before anything
    /// is persisted.
    pub async fn run(&self, request: RunRequest, ctx: &RunContext) -> Result<Storyboard> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(Error::Validation("prompt must not be empty".into()));
        }
        let provider = request
            .provider
            .unwrap_or_else(|| self.default_provider.clone());

        let plan = self
            .decomposer
            .decompose(prompt, &provider, request.scene_count_hint)
            .await
            .map_err(|e| {
                tracing::error!(provider = %provider, error = %e, "Decomposition failed");
                Error::pipeline("decompose", e.to_string())
            })?;
        if plan.is_empty() {
            tracing::error!(provider = %provider, "Decomposition returned no scenes");
            return Err(Error::pipeline("decompose", "decomposition returned no scenes"));
        }

        let name = request
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| derive_name(prompt));
        let total = plan.len();
        let storyboard = Storyboard::new(name, prompt, provider, plan.clone());

        let mut merger = StateMerger::new(storyboard, self.store.clone(), ctx.events.clone());
        merger.persist().await;

        tracing::info!(storyboard_id = %merger.id(), scenes = total, "Generation started");
        ctx.events.broadcast(EventPayload::GenerationStarted {
            storyboard_id: merger.id(),
            total_scenes: total,
        });

        Ok(self.drive(merger, &plan, 0, ctx).await)
    }

    /// Continue job `id` from its last checkpoint.
    pub async fn resume(&self, id: StoryboardId, ctx: &RunContext) -> Result<Storyboard> {
        let storyboard = self
            .store
            .read(id)
            .await?
            .ok_or_else(|| Error::not_found("storyboard", id))?;

        let decision = should_resume(&storyboard);
        tracing::debug!(storyboard_id = %storyboard.id, ?decision, "Resume decision");

        match decision {
            ResumeDecision::None => Ok(storyboard),
            ResumeDecision::RepairStatusOnly => {
                tracing::info!(
                    storyboard_id = %storyboard.id,
                    "Repairing stale in-progress status"
                );
                let mut merger =
                    StateMerger::new(storyboard, self.store.clone(), ctx.events.clone());
                Ok(merger.finalize().await)
            }
            ResumeDecision::ResumeGeneration { cursor } => {
                let plan = storyboard.plan.clone();
                let total = storyboard.status.total_scenes;
                let mut merger =
                    StateMerger::new(storyboard, self.store.clone(), ctx.events.clone())
                        .with_resumed_from(cursor);

                let Some(plan) = plan else {
                    tracing::warn!(
                        storyboard_id = %merger.id(),
                        clips = cursor,
                        "Checkpoint has no scene plan; keeping completed clips only"
                    );
                    merger.set_warning(format!(
                        "resumed without a scene plan; kept {cursor} of {total} scenes"
                    ));
                    return Ok(merger.finalize().await);
                };

                tracing::info!(
                    storyboard_id = %merger.id(),
                    resumed_from = cursor,
                    total,
                    "Generation resumed"
                );
                ctx.events.broadcast(EventPayload::GenerationResumed {
                    storyboard_id: merger.id(),
                    resumed_from: cursor,
                    total_scenes: total,
                });
                Ok(self.drive(merger, &plan, cursor, ctx).await)
            }
        }
    }

    /// Resume every storyboard the store still lists as in progress.
    ///
    /// A storyboard that fails to resume is logged and skipped.
    pub async fn resume_pending(&self, ctx: &RunContext) -> Result<Vec<Storyboard>> {
        let ids = self.store.list_in_progress().await?;
        tracing::info!(count = ids.len(), "Resuming in-progress storyboards");

        let mut resumed = Vec::with_capacity(ids.len());
        for id in ids {
            if ctx.cancellation.is_cancelled() {
                break;
            }
            match self.resume(id, ctx).await {
                Ok(storyboard) => resumed.push(storyboard),
                Err(e) => tracing::warn!(storyboard_id = %id, error = %e, "Resume failed"),
            }
        }
        Ok(resumed)
    }

    /// Dispatch `plan[cursor..]` and merge each result as it settles.
    ///
    /// The merger stays on this task; scene tasks only hand back
    /// [`TaskResult`]s. When cancellation leaves scenes undispatched the
    /// storyboard is checkpointed in progress instead of finalized.
    async fn drive(
        &self,
        mut merger: StateMerger,
        plan: &ScenePlan,
        cursor: usize,
        ctx: &RunContext,
    ) -> Storyboard {
        let provider = merger.storyboard().provider.clone();
        let storyboard_id = merger.id();
        let semaphore =
            (self.max_concurrent > 0).then(|| Arc::new(Semaphore::new(self.max_concurrent)));

        let mut queue = plan
            .remaining(cursor)
            .map(|(index, scene)| (index, scene.clone()));
        let mut next = queue.next();
        let mut tasks = JoinSet::new();
        let mut interrupted = false;

        while next.is_some() || !tasks.is_empty() {
            tokio::select! {
                biased;

                _ = ctx.cancellation.cancelled(), if next.is_some() => {
                    tracing::info!(
                        storyboard_id = %storyboard_id,
                        "Cancelled; no further scenes dispatched"
                    );
                    interrupted = true;
                    next = None;
                }

                permit = acquire(semaphore.as_ref()), if next.is_some() => {
                    if let Some((index, scene)) = next.take() {
                        let runner = self.runner.clone();
                        let provider = provider.clone();
                        tracing::debug!(
                            storyboard_id = %storyboard_id,
                            scene = index,
                            "Dispatching scene"
                        );

                        tasks.spawn(async move {
                            let _permit = permit;
                            // The inner task turns a panic into a failure of this scene.
                            let handle = tokio::spawn(async move {
                                runner.generate(index, &scene, &provider).await
                            });
                            let outcome = match handle.await {
                                Ok(outcome) => outcome,
                                Err(e) => Err(Error::Internal(format!("scene task aborted: {e}"))),
                            };
                            TaskResult { index, outcome }
                        });
                    }
                    next = queue.next();
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(result) => {
                            let progress = merger.apply(result).await;
                            ctx.progress.send(progress);
                        }
                        Err(e) => {
                            tracing::error!(
                                storyboard_id = %storyboard_id,
                                error = %e,
                                "Scene task lost"
                            );
                            interrupted = true;
                        }
                    }
                }
            }
        }

        if interrupted {
            merger.interrupt().await
        } else {
            merger.finalize().await
        }
    }
}

/// Wait for a dispatch slot; `None` when concurrency is unbounded.
async fn acquire(semaphore: Option<&Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match semaphore {
        Some(sem) => sem.clone().acquire_owned().await.ok(),
        None => None,
    }
}

/// First line of the prompt, cut to [`MAX_DERIVED_NAME`] characters.
fn derive_name(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= MAX_DERIVED_NAME {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX_DERIVED_NAME).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Progress, ProgressSender};
    use crate::services::GeneratedScene;
    use crate::store::MemoryCheckpointStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use sb_core::{Clip, ClipId, SceneDescription};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    // -- Fakes ----------------------------------------------------------------

    fn plan(n: usize) -> ScenePlan {
        ScenePlan::new(
            (0..n)
                .map(|i| SceneDescription {
                    id: Some(format!("s{i}")),
                    prompt: format!("scene {i}"),
                    target_duration_seconds: 2.0,
                })
                .collect(),
        )
    }

    fn scene_index(description: &str) -> usize {
        description
            .trim_start_matches("scene ")
            .parse()
            .unwrap_or(usize::MAX)
    }

    struct FakeDecomposer {
        result: Mutex<Option<Result<ScenePlan>>>,
        calls: AtomicUsize,
    }

    impl FakeDecomposer {
        fn ok(n: usize) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(Ok(plan(n)))),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(Err(Error::upstream("decomposition", "500")))),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Decomposer for FakeDecomposer {
        async fn decompose(&self, _: &str, _: &ProviderId, _: Option<u32>) -> Result<ScenePlan> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .lock()
                .take()
                .unwrap_or_else(|| Err(Error::Internal("decomposed twice".into())))
        }
    }

    /// Records every dispatched scene index; fails the indices in `fail`.
    #[derive(Default)]
    struct FakeGenerator {
        calls: Mutex<Vec<usize>>,
        fail: HashSet<usize>,
        /// Later scenes finish first when set.
        reverse_delay_ms: Option<u64>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        cancel_on_first: Option<CancellationToken>,
    }

    impl FakeGenerator {
        fn calls(&self) -> Vec<usize> {
            let mut calls = self.calls.lock().clone();
            calls.sort_unstable();
            calls
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, description: &str, _: &ProviderId) -> Result<GeneratedScene> {
            let index = scene_index(description);
            self.calls.lock().push(index);
            if let Some(ref token) = self.cancel_on_first {
                token.cancel();
            }

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = match self.reverse_delay_ms {
                Some(ms) => ms * (10 - index.min(10)) as u64,
                None => 5,
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&index) {
                return Err(Error::upstream("generation", "malformed response"));
            }
            Ok(GeneratedScene {
                content: format!("<svg id=\"{index}\"/>"),
                message: format!("rendered {index}"),
                external_content_id: None,
            })
        }
    }

    /// Wraps a memory store and keeps every snapshot it was asked to write.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryCheckpointStore,
        history: Mutex<Vec<Storyboard>>,
    }

    impl RecordingStore {
        fn assigning() -> Self {
            Self {
                inner: MemoryCheckpointStore::new().with_assigned_ids(),
                history: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CheckpointStore for RecordingStore {
        async fn write(&self, storyboard: &Storyboard) -> Result<StoryboardId> {
            self.history.lock().push(storyboard.clone());
            self.inner.write(storyboard).await
        }

        async fn read(&self, id: StoryboardId) -> Result<Option<Storyboard>> {
            self.inner.read(id).await
        }

        async fn list_in_progress(&self) -> Result<Vec<StoryboardId>> {
            self.inner.list_in_progress().await
        }
    }

    fn orchestrator(
        decomposer: Arc<FakeDecomposer>,
        generator: Arc<FakeGenerator>,
        store: Arc<dyn CheckpointStore>,
    ) -> Orchestrator {
        Orchestrator::new(decomposer, generator.clone(), store).with_runner(
            SceneTaskRunner::new(generator)
                .with_retry(RetryPolicy::none())
                .with_validator(ContentValidator::new("<svg")),
        )
    }

    fn clip(order: usize) -> Clip {
        Clip {
            id: ClipId::new(),
            name: format!("Scene {}", order + 1),
            content: "<svg/>".into(),
            duration_seconds: 2.0,
            order,
            prompt: format!("scene {order}"),
            dialogue_history: Vec::new(),
            created_at: Utc::now(),
            external_content_id: None,
            provider: "openai".into(),
        }
    }

    /// A checkpoint left behind by a process that died after `done` scenes.
    fn interrupted_storyboard(total: usize, done: usize) -> Storyboard {
        let mut sb = Storyboard::new("Crashed", "x", "openai".into(), plan(total));
        sb.clips = (0..done).map(clip).collect();
        sb.status.completed_scenes = done;
        sb
    }

    // -- Fresh runs -----------------------------------------------------------

    #[tokio::test]
    async fn fresh_run_generates_every_scene() {
        let store = Arc::new(RecordingStore::default());
        let gen = Arc::new(FakeGenerator::default());
        let orch = orchestrator(FakeDecomposer::ok(3), gen.clone(), store.clone());

        let sb = orch
            .run(RunRequest::new("a short film"), &RunContext::new())
            .await
            .unwrap();

        assert!(!sb.status.in_progress);
        assert_eq!(sb.status.total_scenes, 3);
        assert_eq!(sb.status.completed_scenes, 3);
        assert_eq!(sb.status.error, None);
        assert_eq!(sb.name, "a short film");
        assert_eq!(gen.calls(), vec![0, 1, 2]);

        for snap in store.history.lock().iter() {
            assert_eq!(snap.status.completed_scenes, snap.clips.len());
        }
    }

    #[tokio::test]
    async fn out_of_order_completion_keeps_clip_order() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let gen = Arc::new(FakeGenerator {
            reverse_delay_ms: Some(5),
            ..Default::default()
        });
        let orch = orchestrator(FakeDecomposer::ok(5), gen, store);

        let sb = orch.run(RunRequest::new("x"), &RunContext::new()).await.unwrap();
        let orders: Vec<_> = sb.clips.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn one_failed_scene_does_not_abort_the_job() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let gen = Arc::new(FakeGenerator {
            fail: HashSet::from([2]),
            ..Default::default()
        });
        let events = Arc::new(sb_core::events::EventBus::default());
        let orch = orchestrator(FakeDecomposer::ok(5), gen, store.clone());

        let sb = orch
            .run(RunRequest::new("x"), &RunContext::new().with_events(events.clone()))
            .await
            .unwrap();

        let orders: Vec<_> = sb.clips.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 1, 3, 4]);
        assert_eq!(sb.status.completed_scenes, 4);
        assert!(!sb.status.in_progress);
        assert!(sb.status.error.as_deref().unwrap().contains("scene 2"));

        let completed = events
            .recent_events(100)
            .into_iter()
            .find_map(|e| match e.payload {
                EventPayload::GenerationCompleted { errors, .. } => Some(errors),
                _ => None,
            })
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].index, 2);

        assert_eq!(store.snapshot(sb.id).unwrap(), sb);
    }

    #[tokio::test]
    async fn decomposition_failure_persists_nothing() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let gen = Arc::new(FakeGenerator::default());
        let progress = Arc::new(Mutex::new(Vec::<Progress>::new()));
        let sink = progress.clone();
        let ctx =
            RunContext::new().with_progress(ProgressSender::new(move |p| sink.lock().push(p)));
        let orch = orchestrator(FakeDecomposer::failing(), gen.clone(), store.clone());

        let err = orch.run(RunRequest::new("X"), &ctx).await.unwrap_err();

        assert_matches!(err, Error::Pipeline { ref step, .. } if step == "decompose");
        assert!(store.write_log().is_empty());
        assert!(progress.lock().is_empty());
        assert!(gen.calls().is_empty());
        assert!(ctx.events.recent_events(10).is_empty());
    }

    #[tokio::test]
    async fn empty_plan_is_catastrophic() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let orch = orchestrator(
            FakeDecomposer::ok(0),
            Arc::new(FakeGenerator::default()),
            store.clone(),
        );
        let err = orch
            .run(RunRequest::new("x"), &RunContext::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Pipeline { .. });
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_decomposing() {
        let decomposer = FakeDecomposer::ok(2);
        let orch = orchestrator(
            decomposer.clone(),
            Arc::new(FakeGenerator::default()),
            Arc::new(MemoryCheckpointStore::new()),
        );
        let err = orch
            .run(RunRequest::new("   "), &RunContext::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Validation(_));
        assert_eq!(decomposer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn progress_is_reported_after_every_merge() {
        let progress = Arc::new(Mutex::new(Vec::<Progress>::new()));
        let sink = progress.clone();
        let ctx =
            RunContext::new().with_progress(ProgressSender::new(move |p| sink.lock().push(p)));
        let gen = Arc::new(FakeGenerator {
            fail: HashSet::from([1]),
            ..Default::default()
        });
        let orch = orchestrator(
            FakeDecomposer::ok(4),
            gen,
            Arc::new(MemoryCheckpointStore::new()),
        );

        orch.run(RunRequest::new("x"), &ctx).await.unwrap();

        let seen = progress.lock().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0].current <= w[1].current));
        assert_eq!(seen.last().unwrap().current, 4);
        assert!(seen.iter().all(|p| p.total == 4 && p.resumed_from.is_none()));
    }

    #[tokio::test]
    async fn canonical_id_is_used_for_every_later_write() {
        let store = Arc::new(RecordingStore::assigning());
        let gen = Arc::new(FakeGenerator::default());
        let orch = orchestrator(FakeDecomposer::ok(3), gen, store.clone());

        let sb = orch.run(RunRequest::new("x"), &RunContext::new()).await.unwrap();

        let log = store.inner.write_log();
        let proposed = log[0];
        assert_ne!(proposed, sb.id);
        assert!(log[1..].iter().all(|id| *id == sb.id));
        assert_eq!(store.inner.snapshot(sb.id).unwrap().id, sb.id);
    }

    #[tokio::test]
    async fn bounded_concurrency_is_respected() {
        let gen = Arc::new(FakeGenerator {
            reverse_delay_ms: Some(2),
            ..Default::default()
        });
        let orch = orchestrator(
            FakeDecomposer::ok(6),
            gen.clone(),
            Arc::new(MemoryCheckpointStore::new()),
        )
        .with_max_concurrent(2);

        let sb = orch.run(RunRequest::new("x"), &RunContext::new()).await.unwrap();

        assert_eq!(sb.clips.len(), 6);
        assert!(gen.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_and_keeps_job_resumable() {
        let token = CancellationToken::new();
        let store = Arc::new(MemoryCheckpointStore::new());
        let gen = Arc::new(FakeGenerator {
            cancel_on_first: Some(token.clone()),
            ..Default::default()
        });
        let orch = orchestrator(FakeDecomposer::ok(4), gen.clone(), store.clone())
            .with_max_concurrent(1);

        let sb = orch
            .run(RunRequest::new("x"), &RunContext::new().with_cancellation(token))
            .await
            .unwrap();

        assert_eq!(gen.calls(), vec![0]);
        assert!(sb.status.in_progress);
        assert_eq!(sb.clips.len(), 1);
        assert!(store.snapshot(sb.id).unwrap().status.in_progress);
    }

    // -- Resume ---------------------------------------------------------------

    #[tokio::test]
    async fn resume_dispatches_only_remaining_scenes() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let seeded = interrupted_storyboard(5, 2);
        let id = seeded.id;
        store.insert(seeded);

        let gen = Arc::new(FakeGenerator::default());
        let decomposer = FakeDecomposer::ok(5);
        let orch = orchestrator(decomposer.clone(), gen.clone(), store.clone());

        let sb = orch.resume(id, &RunContext::new()).await.unwrap();

        assert_eq!(gen.calls(), vec![2, 3, 4]);
        assert_eq!(decomposer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sb.clips.len(), 5);
        let orders: Vec<_> = sb.clips.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4]);
        assert!(!sb.status.in_progress);
    }

    #[tokio::test]
    async fn resume_reports_scene_lost_before_interruption() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut seeded = interrupted_storyboard(5, 0);
        seeded.clips = vec![clip(0), clip(2)];
        seeded.status.completed_scenes = 2;
        let id = seeded.id;
        store.insert(seeded);

        let progress = Arc::new(Mutex::new(Vec::<Progress>::new()));
        let sink = progress.clone();
        let ctx =
            RunContext::new().with_progress(ProgressSender::new(move |p| sink.lock().push(p)));
        let gen = Arc::new(FakeGenerator::default());
        let orch = orchestrator(FakeDecomposer::ok(5), gen.clone(), store.clone());

        let sb = orch.resume(id, &ctx).await.unwrap();

        assert_eq!(gen.calls(), vec![2, 3, 4]);
        let orders: Vec<_> = sb.clips.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 2, 3, 4]);
        assert!(!sb.status.in_progress);
        assert_eq!(
            sb.status.error.as_deref(),
            Some("1 of 5 scenes failed: scene 1: not generated")
        );
        assert_eq!(store.snapshot(id).unwrap().status.error, sb.status.error);
        assert_eq!(
            progress.lock().last().copied(),
            Some(Progress {
                current: 5,
                total: 5,
                resumed_from: Some(2)
            })
        );
    }

    #[tokio::test]
    async fn resume_reports_resumed_from() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let seeded = interrupted_storyboard(4, 3);
        let id = seeded.id;
        store.insert(seeded);

        let progress = Arc::new(Mutex::new(Vec::<Progress>::new()));
        let sink = progress.clone();
        let ctx =
            RunContext::new().with_progress(ProgressSender::new(move |p| sink.lock().push(p)));
        let orch = orchestrator(
            FakeDecomposer::ok(4),
            Arc::new(FakeGenerator::default()),
            store,
        );

        orch.resume(id, &ctx).await.unwrap();

        assert_eq!(
            progress.lock().clone(),
            vec![Progress {
                current: 4,
                total: 4,
                resumed_from: Some(3)
            }]
        );
    }

    #[tokio::test]
    async fn resume_of_complete_job_only_repairs_status() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let seeded = interrupted_storyboard(3, 3);
        let id = seeded.id;
        store.insert(seeded);

        let gen = Arc::new(FakeGenerator::default());
        let orch = orchestrator(FakeDecomposer::ok(3), gen.clone(), store.clone());
        let sb = orch.resume(id, &RunContext::new()).await.unwrap();

        assert!(gen.calls().is_empty());
        assert!(!sb.status.in_progress);
        assert!(sb.status.completed_at.is_some());
        assert!(!store.snapshot(id).unwrap().status.in_progress);
    }

    #[tokio::test]
    async fn resume_without_plan_keeps_existing_clips() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut seeded = interrupted_storyboard(4, 1);
        seeded.plan = None;
        let id = seeded.id;
        store.insert(seeded);

        let gen = Arc::new(FakeGenerator::default());
        let orch = orchestrator(FakeDecomposer::ok(4), gen.clone(), store);
        let sb = orch.resume(id, &RunContext::new()).await.unwrap();

        assert!(gen.calls().is_empty());
        assert_eq!(sb.clips.len(), 1);
        assert!(!sb.status.in_progress);
        assert!(sb.status.error.unwrap().contains("without a scene plan"));
    }

    #[tokio::test]
    async fn resume_of_finished_job_is_a_no_op() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut seeded = interrupted_storyboard(2, 2);
        seeded.status.in_progress = false;
        let id = seeded.id;
        store.insert(seeded.clone());

        let orch = orchestrator(
            FakeDecomposer::ok(2),
            Arc::new(FakeGenerator::default()),
            store.clone(),
        );
        let sb = orch.resume(id, &RunContext::new()).await.unwrap();

        assert_eq!(sb, seeded);
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn resume_missing_storyboard_is_not_found() {
        let orch = orchestrator(
            FakeDecomposer::ok(1),
            Arc::new(FakeGenerator::default()),
            Arc::new(MemoryCheckpointStore::new()),
        );
        let err = orch
            .resume(StoryboardId::new(), &RunContext::new())
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound { .. });
    }

    #[tokio::test]
    async fn resume_after_canonicalization_uses_canonical_id() {
        let store = Arc::new(MemoryCheckpointStore::new().with_assigned_ids());
        let token = CancellationToken::new();
        let gen = Arc::new(FakeGenerator {
            cancel_on_first: Some(token.clone()),
            ..Default::default()
        });
        let orch = orchestrator(FakeDecomposer::ok(3), gen, store.clone()).with_max_concurrent(1);
        let partial = orch
            .run(RunRequest::new("x"), &RunContext::new().with_cancellation(token))
            .await
            .unwrap();
        let canonical = partial.id;
        let proposed = store.write_log()[0];
        assert_ne!(proposed, canonical);

        let orch = orchestrator(
            FakeDecomposer::ok(3),
            Arc::new(FakeGenerator::default()),
            store.clone(),
        );
        let sb = orch.resume(canonical, &RunContext::new()).await.unwrap();

        assert_eq!(sb.id, canonical);
        assert_eq!(sb.clips.len(), 3);
        assert_eq!(store.read_log(), vec![canonical]);
        assert!(store.write_log()[1..].iter().all(|id| *id == canonical));
    }

    #[tokio::test]
    async fn resume_pending_handles_every_in_progress_job() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let a = interrupted_storyboard(3, 1);
        let b = interrupted_storyboard(2, 2);
        let mut done = interrupted_storyboard(2, 2);
        done.status.in_progress = false;
        store.insert(a);
        store.insert(b);
        store.insert(done);

        let gen = Arc::new(FakeGenerator::default());
        let orch = orchestrator(FakeDecomposer::ok(1), gen.clone(), store.clone());
        let resumed = orch.resume_pending(&RunContext::new()).await.unwrap();

        assert_eq!(resumed.len(), 2);
        assert!(resumed.iter().all(|sb| !sb.status.in_progress));
        assert_eq!(gen.calls(), vec![1, 2]);
        assert!(store.list_in_progress().await.unwrap().is_empty());
    }

    #[test]
    fn derived_names_are_short() {
        assert_eq!(derive_name("A cat\nin space"), "A cat");
        let long = "x".repeat(100);
        let name = derive_name(&long);
        assert!(name.ends_with("..."));
        assert_eq!(name.chars().count(), MAX_DERIVED_NAME + 3);
    }
}
