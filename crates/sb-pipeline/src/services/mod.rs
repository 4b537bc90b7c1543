//! External services consumed by the pipeline.
//!
//! The pipeline only depends on the [`Decomposer`] and [`Generator`]
//! traits; [`HttpDecomposer`] and [`HttpGenerator`] are the JSON-over-HTTP
//! implementations used by the CLI.

mod decompose;
mod generate;

pub use decompose::HttpDecomposer;
pub use generate::HttpGenerator;

use std::time::Duration;

use async_trait::async_trait;
use sb_core::{Error, ProviderId, Result, ScenePlan};

/// Turns a natural-language request into an ordered scene plan.
#[async_trait]
pub trait Decomposer: Send + Sync {
    /// Produce the plan for `prompt`. When `scene_count_hint` is `None` the
    /// service chooses the number of scenes.
    async fn decompose(
        &self,
        prompt: &str,
        provider: &ProviderId,
        scene_count_hint: Option<u32>,
    ) -> Result<ScenePlan>;
}

/// Raw output of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedScene {
    pub content: String,
    pub message: String,
    pub external_content_id: Option<String>,
}

/// Renders a single scene description.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, description: &str, provider: &ProviderId) -> Result<GeneratedScene>;
}

/// Build a `reqwest` client with the given per-request timeout.
fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if !timeout.is_zero() {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))
}

/// Classify a transport-level failure.
///
/// Timeouts and dropped connections are transient; everything else (bad
/// URL, undecodable body, redirect loops) is terminal.
fn classify_request_error(service: &str, e: &reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::transient(service, format!("request timed out: {e}"))
    } else if e.is_connect() || (e.is_request() && !e.is_builder()) {
        Error::transient(service, format!("request aborted: {e}"))
    } else {
        Error::upstream(service, e.to_string())
    }
}

/// Turn a non-success HTTP response into an error.
///
/// 408 and 504 report a timeout on the far side and are transient.
async fn error_for_status(service: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{status}: {body}");
    if status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::GATEWAY_TIMEOUT
    {
        Err(Error::transient(service, message))
    } else {
        Err(Error::upstream(service, message))
    }
}
