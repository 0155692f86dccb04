//! OpenAI Responses API client.
//!
//! Sends one non-streaming `POST {base_url}/responses` per model turn and
//! retries transient failures with exponential backoff. Conversation state
//! lives server-side; the caller threads `previous_response_id` through.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::InferenceError;
use super::types::{ModelRequest, ModelResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Environment variable holding the API key.
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout. Tool-heavy turns can take a while to generate.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Retries after the first attempt for transient failures.
const MAX_RETRIES: u32 = 2;

/// Backoff before the first retry; doubles on each subsequent one.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ─── Model Seam ──────────────────────────────────────────────────────────────

/// Anything that can answer a model turn.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse, InferenceError>;
}

/// Read the API key from the environment.
pub fn api_key_from_env() -> Result<String, InferenceError> {
    match std::env::var(API_KEY_ENV_VAR) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(InferenceError::MissingCredentials {
            var: API_KEY_ENV_VAR.to_string(),
        }),
    }
}

// ─── ResponsesClient ─────────────────────────────────────────────────────────

/// Client for the Responses API endpoint.
pub struct ResponsesClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl ResponsesClient {
    /// Create a client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn new(base_url: &str, api_key: String) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    /// Attempt a single request.
    async fn try_request(&self, request: &ModelRequest) -> Result<ModelResponse, InferenceError> {
        let url = self.endpoint();

        tracing::info!(
            url = %url,
            model = %request.model,
            input_items = request.input.len(),
            tool_count = request.tools.len(),
            continued = request.previous_response_id.is_some(),
            "=== LLM REQUEST ==="
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: REQUEST_TIMEOUT.as_secs(),
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response.text().await.map_err(|e| InferenceError::ConnectionFailed {
            endpoint: url.clone(),
            reason: format!("failed to read response body: {e}"),
        })?;

        parse_response(&body_text)
    }
}

#[async_trait]
impl ModelBackend for ResponsesClient {
    /// Send the request, retrying transient failures.
    async fn respond(&self, request: ModelRequest) -> Result<ModelResponse, InferenceError> {
        let mut attempt = 0;
        loop {
            match self.try_request(&request).await {
                Ok(response) => {
                    tracing::info!(
                        response_id = %response.id,
                        output_items = response.output.len(),
                        function_calls = response.function_calls().len(),
                        "=== LLM RESPONSE ==="
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                    let delay = retry_delay(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "model request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Backoff before retry number `attempt` (0-based).
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY * 2u32.saturating_pow(attempt)
}

/// Parse a Responses API body, mapping shape errors to `ParseError`.
fn parse_response(body: &str) -> Result<ModelResponse, InferenceError> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        InferenceError::ParseError {
            reason: format!("{e} (body: {preview})"),
        }
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
