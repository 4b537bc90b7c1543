//! Single-scene generation with a bounded retry policy.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use sb_core::config::DEFAULT_CONTENT_MARKER;
use sb_core::{Clip, ClipId, Error, Message, ProviderId, Result, SceneDescription};

use crate::services::{GeneratedScene, Generator};

/// How often, and after how long, a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    /// One retry after a short pause.
    fn default() -> Self {
        Self::new(1, Duration::from_millis(500))
    }
}

/// Minimal structural check applied to generated content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentValidator {
    marker: Option<String>,
}

impl ContentValidator {
    /// Require `marker` to appear in the content. An empty marker only
    /// checks for non-empty content.
    pub fn new(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self {
            marker: (!marker.is_empty()).then_some(marker),
        }
    }

    /// Accept any non-empty content.
    pub fn non_empty() -> Self {
        Self { marker: None }
    }

    pub fn check(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(Error::InvalidContent("generated content is empty".into()));
        }
        if let Some(ref marker) = self.marker {
            if !content.contains(marker.as_str()) {
                return Err(Error::InvalidContent(format!(
                    "generated content is missing marker {marker:?}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ContentValidator {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENT_MARKER)
    }
}

/// Outcome of one dispatched scene, tagged with its absolute index.
#[derive(Debug)]
pub struct TaskResult {
    pub index: usize,
    pub outcome: Result<Clip>,
}

impl TaskResult {
    pub fn success(index: usize, clip: Clip) -> Self {
        Self {
            index,
            outcome: Ok(clip),
        }
    }

    pub fn failure(index: usize, error: Error) -> Self {
        Self {
            index,
            outcome: Err(error),
        }
    }
}

/// Executes the generation call for one scene.
#[derive(Clone)]
pub struct SceneTaskRunner {
    generator: Arc<dyn Generator>,
    retry: RetryPolicy,
    validator: ContentValidator,
}

impl SceneTaskRunner {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            retry: RetryPolicy::default(),
            validator: ContentValidator::default(),
        }
    }

    /// Builder: replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder: replace the content validator.
    pub fn with_validator(mut self, validator: ContentValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Generate scene `index` and turn the result into a [`Clip`].
    ///
    /// Only [`Error::Transient`] failures are retried. Content that fails
    /// validation is terminal.
    #[tracing::instrument(skip(self, scene), fields(scene = index))]
    pub async fn generate(
        &self,
        index: usize,
        scene: &SceneDescription,
        provider: &ProviderId,
    ) -> Result<Clip> {
        let generated = self.call_with_retry(index, scene, provider).await?;
        self.validator.check(&generated.content)?;

        Ok(Clip {
            id: ClipId::new(),
            name: format!("Scene {}", index + 1),
            content: generated.content,
            duration_seconds: scene.target_duration_seconds,
            order: index,
            prompt: scene.prompt.clone(),
            dialogue_history: vec![
                Message::user(scene.prompt.clone()),
                Message::assistant(generated.message),
            ],
            created_at: Utc::now(),
            external_content_id: generated.external_content_id,
            provider: provider.clone(),
        })
    }

    async fn call_with_retry(
        &self,
        index: usize,
        scene: &SceneDescription,
        provider: &ProviderId,
    ) -> Result<GeneratedScene> {
        let mut attempt = 0;
        loop {
            match self.generator.generate(&scene.prompt, provider).await {
                Ok(generated) => return Ok(generated),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        scene = index,
                        attempt,
                        error = %e,
                        "Retrying scene after transient failure"
                    );
                    if !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
