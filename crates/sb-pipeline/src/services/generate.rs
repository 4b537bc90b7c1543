//! HTTP client for the generation service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sb_core::config::ServiceConfig;
use sb_core::{Error, ProviderId, Result};

use super::{build_client, classify_request_error, error_for_status, GeneratedScene, Generator};

const SERVICE: &str = "generation";

/// Calls `POST {base_url}/generate`.
pub struct HttpGenerator {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerator {
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
struct GenerateRequest<'a> {
    description: &'a str,
    provider: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    content: String,
    #[serde(default)]
    message: String,
    #[serde(default, alias = "externalId", alias = "external_content_id")]
    external_id: Option<String>,
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, description: &str, provider: &ProviderId) -> Result<GeneratedScene> {
        let url = format!("{}/generate", self.base_url);
        let body = GenerateRequest {
            description,
            provider: provider.as_str(),
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

        let parsed: GenerateResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                Error::transient(SERVICE, format!("response timed out: {e}"))
            } else {
                Error::upstream(SERVICE, format!("malformed response: {e}"))
            }
        })?;

        Ok(GeneratedScene {
            content: parsed.content,
            message: parsed.message,
            external_content_id: parsed.external_id,
        })
    }
}
