// llm-service-rs/src/llm_client.rs
//
// HTTP client for OpenAI-compatible chat completion endpoints
//
// - Real HTTP calls via reqwest
// - Exponential backoff retries for transient failures (5xx, 429, network)
// - When the key may not use the configured model (403/404), the client
//   walks the fallback model list and stays on the first model that works
//
// Configuration comes from `LlmSettings` (see `[llm]` in the engine config
// and the OPENAI_* environment variables).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared_types::{ExternalServiceError, LlmSettings};

use crate::{InvokeOptions, LanguageModel};

const SERVICE: &str = "llm";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, accurate customer support assistant.";

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// Classified failure of one chat completion call
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    // Not retried: need a config or request change
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Model not available: {0}")]
    ModelNotAvailable(String),

    // Retried with backoff
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("Server error: {0}")]
    ServerError(String),
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Unknown error: {0}")]
    UnknownError(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::ServerError(_) | LlmError::NetworkError(_) | LlmError::RateLimitExceeded(_)
        )
    }

    fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => LlmError::InvalidRequest(format!("Bad request: {}", body)),
            401 => LlmError::InvalidRequest(format!("Unauthorized: {}", body)),
            403 => LlmError::ModelNotAvailable(format!("Forbidden: {}", body)),
            404 => LlmError::ModelNotAvailable(format!("Not found: {}", body)),
            429 => LlmError::RateLimitExceeded(body),
            500 | 502 | 503 | 504 => LlmError::ServerError(format!("({}) {}", status, body)),
            _ => LlmError::UnknownError(format!("({}) {}", status, body)),
        }
    }
}

impl From<LlmError> for ExternalServiceError {
    fn from(err: LlmError) -> Self {
        if err.is_retryable() {
            ExternalServiceError::transient(SERVICE, err.to_string())
        } else {
            ExternalServiceError::permanent(SERVICE, err.to_string())
        }
    }
}

/// Drops inline `.env` comments ("https://host/v1  # staging") and blanks
pub fn sanitize_base_url(raw: &str) -> Option<String> {
    let cleaned = raw.split('#').next().unwrap_or_default().trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.trim_end_matches('/').to_string())
    }
}

fn completions_endpoint(base_url: &str) -> String {
    if base_url.ends_with("/chat/completions") {
        base_url.to_string()
    } else {
        format!("{}/chat/completions", base_url)
    }
}

#[derive(Debug)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    endpoint: String,
    /// Configured model first, then fallbacks in order
    models: Vec<String>,
    active_model: AtomicUsize,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    initial_retry_delay_ms: u64,
    max_retry_delay_ms: u64,
}

impl LlmClient {
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidRequest("API key is not set".to_string()))?;

        let base_url = sanitize_base_url(&settings.base_url)
            .ok_or_else(|| LlmError::InvalidRequest("base url is empty".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::UnknownError(format!("failed to build HTTP client: {}", e)))?;

        let mut models = vec![settings.model.clone()];
        models.extend(
            settings
                .fallback_models
                .iter()
                .filter(|m| !m.trim().is_empty() && **m != settings.model)
                .cloned(),
        );

        let endpoint = completions_endpoint(&base_url);
        log::info!("LLM client initialized for {} (models: {:?})", endpoint, models);

        Ok(Self {
            client,
            api_key,
            endpoint,
            models,
            active_model: AtomicUsize::new(0),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_retries: settings.max_retries,
            initial_retry_delay_ms: settings.initial_retry_delay_ms,
            max_retry_delay_ms: settings.max_retry_delay_ms,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn active_model(&self) -> &str {
        let index = self.active_model.load(Ordering::Relaxed);
        self.models.get(index).map_or("", String::as_str)
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_retry_delay_ms))
            .with_max_interval(Duration::from_millis(self.max_retry_delay_ms))
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(Duration::from_secs(120)))
            .with_randomization_factor(0.5)
            .build()
    }

    /// Generates text with the active model, falling through the fallback
    /// list when the provider refuses the model itself
    pub async fn generate_text(&self, prompt: &str, options: &InvokeOptions) -> Result<String, LlmError> {
        let start = self.active_model.load(Ordering::Relaxed);
        let mut last_error = None;

        for index in start..self.models.len() {
            let model = &self.models[index];
            match self.generate_with_model(model, prompt, options).await {
                Ok(text) => {
                    if index != start {
                        log::warn!("Switching to fallback model {} for subsequent calls", model);
                        self.active_model.store(index, Ordering::Relaxed);
                    }
                    return Ok(text);
                }
                Err(LlmError::ModelNotAvailable(msg)) => {
                    log::warn!("Model {} not available: {}", model, msg);
                    last_error = Some(LlmError::ModelNotAvailable(format!(
                        "model={}, fallbacks={:?}: {}",
                        model,
                        &self.models[index + 1..],
                        msg
                    )));
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::ModelNotAvailable("no model configured".to_string())))
    }

    async fn generate_with_model(
        &self,
        model: &str,
        prompt: &str,
        options: &InvokeOptions,
    ) -> Result<String, LlmError> {
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        let request_body = ChatCompletionRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: options
                        .system_prompt
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: Some(options.temperature.unwrap_or(self.temperature)),
            max_tokens: Some(options.max_tokens.unwrap_or(self.max_tokens)),
        };

        log::debug!("Preparing LLM request to {} (model: {})", self.endpoint, model);

        loop {
            attempt += 1;
            if attempt > 1 {
                log::info!("Retry attempt {} for LLM request", attempt);
            }

            match self.execute_request(&request_body).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !err.is_retryable() || attempt > self.max_retries {
                        log::error!("LLM request failed after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    match backoff.next_backoff() {
                        Some(delay) => {
                            let jitter = rand::thread_rng().gen_range(0..=200);
                            let delay = delay + Duration::from_millis(jitter);
                            log::warn!("Retryable error: {}. Retrying in {:?}", err, delay);
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            log::error!("Exceeded maximum backoff time: {}", err);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    async fn execute_request(&self, request_body: &ChatCompletionRequest<'_>) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request_body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    LlmError::NetworkError(format!("Request timed out: {}", err))
                } else if err.is_connect() {
                    LlmError::NetworkError(format!("Connection failed: {}", err))
                } else {
                    LlmError::NetworkError(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), text));
        }

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| LlmError::ParseError(format!("Failed to parse response: {}", err)))?;

        if let Some(usage) = &data.usage {
            log::info!("LLM request completed. Used {} tokens", usage.total_tokens);
        }

        data.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ParseError("No choices returned in response".to_string()))
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    fn name(&self) -> &str {
        self.active_model()
    }

    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, ExternalServiceError> {
        self.generate_text(prompt, options).await.map_err(ExternalServiceError::from)
    }
}
