//! HTTP client for the decomposition service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sb_core::config::ServiceConfig;
use sb_core::{Error, ProviderId, Result, SceneDescription, ScenePlan};

use super::{build_client, classify_request_error, error_for_status, Decomposer};

const SERVICE: &str = "decomposition";

/// Default scene length when the service does not suggest one.
const DEFAULT_SCENE_SECONDS: f64 = 5.0;

/// Calls `POST {base_url}/decompose`.
pub struct HttpDecomposer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDecomposer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        Self::new(
            cfg.base_url.clone(),
            cfg.api_key.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }
}

#[derive(Debug, Serialize)]
struct DecomposeRequest<'a> {
    prompt: &'a str,
    provider: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scene_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DecomposeResponse {
    scenes: Vec<SceneEntry>,
}

#[derive(Debug, Deserialize)]
struct SceneEntry {
    #[serde(default)]
    id: Option<String>,
    prompt: String,
    #[serde(default, alias = "duration_seconds")]
    duration: Option<f64>,
}

#[async_trait]
impl Decomposer for HttpDecomposer {
    async fn decompose(
        &self,
        prompt: &str,
        provider: &ProviderId,
        scene_count_hint: Option<u32>,
    ) -> Result<ScenePlan> {
        let url = format!("{}/decompose", self.base_url);
        let body = DecomposeRequest {
            prompt,
            provider: provider.as_str(),
            scene_count: scene_count_hint,
        };

        let mut req = self.http.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| classify_request_error(SERVICE, &e))?;
        let resp = error_for_status(SERVICE, resp).await?;

        let parsed: DecomposeResponse = resp
            .json()
            .await
            .map_err(|e| Error::upstream(SERVICE, format!("malformed response: {e}")))?;

        tracing::debug!(scenes = parsed.scenes.len(), "Decomposition returned plan");

        let scenes = parsed
            .scenes
            .into_iter()
            .map(|s| SceneDescription {
                id: s.id,
                prompt: s.prompt,
                target_duration_seconds: s.duration.unwrap_or(DEFAULT_SCENE_SECONDS),
            })
            .collect();
        Ok(ScenePlan::new(scenes))
    }
}
