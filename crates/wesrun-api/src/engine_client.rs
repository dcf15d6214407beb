//! HTTP client binding to the external analysis engine.
//!
//! Implements [`AnalysisEngine`] against the engine's REST API. Rejections
//! the engine expresses as 4xx responses become [`LaunchDecision::Rejected`];
//! transport failures and 5xx responses become engine errors, which the
//! orchestration core retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use wesrun_flow::engine::{AbortAck, AnalysisEngine, LaunchCommand, LaunchDecision};
use wesrun_flow::error::{Error, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine-side representation of a created analysis.
#[derive(Debug, Deserialize)]
struct CreatedAnalysis {
    id: String,
}

/// HTTP client for the external analysis engine.
#[derive(Clone)]
pub struct EngineClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl EngineClient {
    /// Creates a new client targeting the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
        }
    }

    fn launch_url(&self) -> String {
        format!("{}/api/analyses", self.base_url.trim_end_matches('/'))
    }

    fn abort_url(&self, external_analysis_id: &str) -> String {
        format!(
            "{}/api/analyses/{external_analysis_id}:abort",
            self.base_url.trim_end_matches('/')
        )
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();
        serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("{status}: {}", String::from_utf8_lossy(&body)))
    }
}

#[async_trait]
impl AnalysisEngine for EngineClient {
    async fn launch(&self, command: LaunchCommand) -> Result<LaunchDecision> {
        let response = self
            .client
            .post(self.launch_url())
            .bearer_auth(&self.token)
            .header("Idempotency-Key", command.idempotency_key())
            .json(&command)
            .send()
            .await
            .map_err(|e| Error::engine_with_source("launch request failed", e))?;

        let status = response.status();
        if status.is_success() {
            let created: CreatedAnalysis = response
                .json()
                .await
                .map_err(|e| Error::engine_with_source("invalid launch response", e))?;
            return Ok(LaunchDecision::Accepted {
                external_analysis_id: created.id,
            });
        }

        let message = Self::error_message(response).await;
        if status.is_client_error() {
            Ok(LaunchDecision::Rejected { reason: message })
        } else {
            Err(Error::engine(format!("launch failed ({status}): {message}")))
        }
    }

    async fn abort(&self, external_analysis_id: &str) -> Result<AbortAck> {
        let response = self
            .client
            .post(self.abort_url(external_analysis_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::engine_with_source("abort request failed", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(AbortAck::Acknowledged);
        }
        // The engine answers 409 when the analysis already reached a final
        // state on its side.
        if status == StatusCode::CONFLICT {
            return Ok(AbortAck::AlreadyFinished);
        }
        let message = Self::error_message(response).await;
        Err(Error::engine(format!("abort failed ({status}): {message}")))
    }
}
