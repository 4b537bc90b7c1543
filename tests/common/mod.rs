//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires an [`Orchestrator`] to a SQLite
//! checkpoint store, an [`EventBus`], and fake decomposition and generation
//! services that record what they were asked to do.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use sb_core::events::EventBus;
use sb_core::{Error, ProviderId, Result, SceneDescription, ScenePlan};
use sb_db::pool::{get_conn, init_memory_pool, init_pool, DbPool, PooledConnection};
use sb_pipeline::{
    ContentValidator, Decomposer, GeneratedScene, Generator, Orchestrator, RetryPolicy,
    RunContext, SceneTaskRunner, SqliteCheckpointStore,
};

/// Plan of `n` scenes whose prompts are `"scene {i}"`.
pub fn plan(n: usize) -> ScenePlan {
    ScenePlan::new(
        (0..n)
            .map(|i| SceneDescription {
                id: Some(format!("s{i}")),
                prompt: format!("scene {i}"),
                target_duration_seconds: 3.0,
            })
            .collect(),
    )
}

/// Decomposition service returning a fixed plan, or failing.
pub struct FakeDecomposer {
    scenes: Option<usize>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeDecomposer {
    pub fn with_scenes(n: usize) -> Arc<Self> {
        Arc::new(Self {
            scenes: Some(n),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            scenes: None,
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Decomposer for FakeDecomposer {
    async fn decompose(&self, prompt: &str, _: &ProviderId, _: Option<u32>) -> Result<ScenePlan> {
        self.calls.lock().push(prompt.to_string());
        match self.scenes {
            Some(n) => Ok(plan(n)),
            None => Err(Error::upstream("decomposition", "503 Service Unavailable")),
        }
    }
}

/// Generation service that records dispatched scene indices.
#[derive(Default)]
pub struct FakeGenerator {
    pub calls: Mutex<Vec<usize>>,
    /// Scenes that fail terminally.
    pub fail: HashSet<usize>,
    /// Scenes that time out on their first attempt only.
    pub flaky: HashSet<usize>,
    /// Cancelled once this many scenes have been requested.
    pub cancel_after: Option<(usize, CancellationToken)>,
}

impl FakeGenerator {
    /// Sorted scene indices, one entry per call (retries included).
    pub fn calls(&self) -> Vec<usize> {
        let mut calls = self.calls.lock().clone();
        calls.sort_unstable();
        calls
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, description: &str, _: &ProviderId) -> Result<GeneratedScene> {
        let index: usize = description
            .trim_start_matches("scene ")
            .parse()
            .map_err(|_| Error::Internal(format!("unexpected description {description:?}")))?;

        let attempt = {
            let mut calls = self.calls.lock();
            calls.push(index);
            if let Some((after, ref token)) = self.cancel_after {
                if calls.len() >= after {
                    token.cancel();
                }
            }
            calls.iter().filter(|i| **i == index).count()
        };

        // Later scenes finish first.
        tokio::time::sleep(Duration::from_millis(2 * (8 - index.min(8)) as u64)).await;

        if self.flaky.contains(&index) && attempt == 1 {
            return Err(Error::transient("generation", "request timed out"));
        }
        if self.fail.contains(&index) {
            return Err(Error::upstream("generation", "response had no content"));
        }
        Ok(GeneratedScene {
            content: format!("<svg data-scene=\"{index}\"></svg>"),
            message: format!("Scene {index} ready"),
            external_content_id: Some(format!("ext-{index}")),
        })
    }
}

/// Orchestrator over a SQLite checkpoint store.
pub struct TestHarness {
    pub db: DbPool,
    pub events: Arc<EventBus>,
    pub decomposer: Arc<FakeDecomposer>,
    pub generator: Arc<FakeGenerator>,
    pub orchestrator: Orchestrator,
}

impl TestHarness {
    /// In-memory database, store-assigned ids, unbounded concurrency.
    pub fn new(decomposer: Arc<FakeDecomposer>, generator: FakeGenerator) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        Self::with_pool(db, decomposer, generator, 0)
    }

    /// Database file at `path`, so a second harness can play a restarted
    /// process.
    pub fn on_disk(
        path: &std::path::Path,
        decomposer: Arc<FakeDecomposer>,
        generator: FakeGenerator,
        max_concurrent: usize,
    ) -> Self {
        let db = init_pool(path).expect("failed to open database");
        Self::with_pool(db, decomposer, generator, max_concurrent)
    }

    fn with_pool(
        db: DbPool,
        decomposer: Arc<FakeDecomposer>,
        generator: FakeGenerator,
        max_concurrent: usize,
    ) -> Self {
        let generator = Arc::new(generator);
        let store = Arc::new(SqliteCheckpointStore::new(db.clone(), true));
        let runner = SceneTaskRunner::new(generator.clone())
            .with_retry(RetryPolicy::new(1, Duration::from_millis(1)))
            .with_validator(ContentValidator::new("<svg"));
        let orchestrator = Orchestrator::new(decomposer.clone(), generator.clone(), store)
            .with_runner(runner)
            .with_max_concurrent(max_concurrent);

        Self {
            db,
            events: Arc::new(EventBus::default()),
            decomposer,
            generator,
            orchestrator,
        }
    }

    pub fn ctx(&self) -> RunContext {
        RunContext::new().with_events(self.events.clone())
    }

    pub fn conn(&self) -> PooledConnection {
        get_conn(&self.db).expect("failed to get connection")
    }
}
