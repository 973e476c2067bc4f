// Generation module
// Client for an external OpenAI-compatible text generation service

pub mod parse;


use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GenerationServiceConfig;
use crate::retry::{Exhausted, RetryPolicy};

pub use parse::{ParsedJson, extract_field, extract_string_list, parse_json};

const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Longest response body kept in an error message
const ERROR_SNIPPET_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Service returned HTTP {status}: {snippet}")]
    Status { status: u16, snippet: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("Response contained no choices")]
    EmptyResponse,
}

impl GenerationError {
    /// Transport failures, rate limiting and server errors may clear up on
    /// their own
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidEndpoint(_) | Self::Decode(_) | Self::EmptyResponse => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Overrides the configured system message
    pub system_message: Option<String>,
}

impl GenerationRequest {
    #[inline]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            system_message: None,
        }
    }

    /// Greedy decoding, temperature 0
    #[inline]
    pub fn deterministic(prompt: impl Into<String>) -> Self {
        Self {
            temperature: 0.0,
            ..Self::new(prompt)
        }
    }

    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[inline]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[inline]
    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage,
}

impl GenerationResponse {
    /// Parse the generated text as JSON, tolerating surrounding prose
    #[inline]
    pub fn json(&self) -> ParsedJson {
        parse_json(&self.text)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// Blocking client for one generation endpoint.
///
/// Every call goes through the configured [`RetryPolicy`]; once it is spent
/// the caller gets [`Exhausted`] back instead of a panic or a hang.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    endpoint: Url,
    model_name: String,
    api_key: Option<String>,
    system_message: String,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

fn snippet(body: &str) -> String {
    body.chars().take(ERROR_SNIPPET_LEN).collect()
}

impl GenerationClient {
    #[inline]
    pub fn new(config: &GenerationServiceConfig) -> anyhow::Result<Self> {
        let endpoint = config.endpoint_url()?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .http_status_as_error(false)
            .build()
            .into();

        info!(
            "Generation client for model {} at {}",
            config.model_name, endpoint
        );

        Ok(Self {
            endpoint,
            model_name: config.model_name.clone(),
            api_key: config.api_key.clone(),
            system_message: config.system_message.clone(),
            agent,
            retry: config.retry_policy(),
        })
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn url(&self, path: &str) -> Result<Url, GenerationError> {
        self.endpoint
            .join(path)
            .map_err(|e| GenerationError::InvalidEndpoint(e.to_string()))
    }

    fn authorization(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| format!("Bearer {key}"))
    }

    /// Read the body of a response, turning non-2xx statuses into errors
    fn read_body(
        result: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<String, GenerationError> {
        let mut response = result.map_err(|e| GenerationError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(GenerationError::Status {
                status,
                snippet: snippet(&body),
            });
        }

        Ok(body)
    }

    fn post_once(&self, url: &Url, body: &str) -> Result<GenerationResponse, GenerationError> {
        let mut request = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json");
        if let Some(auth) = self.authorization() {
            request = request.header("Authorization", &auth);
        }

        let text = Self::read_body(request.send(body))?;
        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| GenerationError::Decode(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyResponse)?;

        let usage = parsed.usage.map_or_else(TokenUsage::default, |usage| TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });

        Ok(GenerationResponse {
            text: choice.message.content.unwrap_or_default(),
            usage,
        })
    }

    /// Send one chat completion
    #[inline]
    pub fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, Exhausted<GenerationError>> {
        let started = Instant::now();
        let url = self.url("chat/completions").map_err(|e| Exhausted {
            attempts: 0,
            last_error: e,
        })?;

        let system_message = request
            .system_message
            .as_deref()
            .unwrap_or(&self.system_message);
        let body = ChatCompletionRequest {
            model: &self.model_name,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_message,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let body = serde_json::to_string(&body).map_err(|e| Exhausted {
            attempts: 0,
            last_error: GenerationError::Decode(e.to_string()),
        })?;

        debug!(
            "POST {} (model {}, prompt {} chars)",
            url,
            self.model_name,
            request.prompt.len()
        );

        let result = self
            .retry
            .run(|_| self.post_once(&url, &body), GenerationError::is_retryable);

        match &result {
            Ok(response) => debug!(
                "Generated {} tokens in {:.2}s",
                response.usage.output_tokens,
                started.elapsed().as_secs_f64()
            ),
            Err(e) => warn!("Generation failed: {}", e),
        }

        result
    }

    /// List model ids served at the endpoint, failing if the configured
    /// model is not among them
    #[inline]
    pub fn health_check(&self) -> Result<Vec<String>, Exhausted<GenerationError>> {
        let url = self.url("models").map_err(|e| Exhausted {
            attempts: 0,
            last_error: e,
        })?;

        let models = self.retry.run(
            |_| -> Result<Vec<String>, GenerationError> {
                let mut request = self.agent.get(url.as_str());
                if let Some(auth) = self.authorization() {
                    request = request.header("Authorization", &auth);
                }
                let text = Self::read_body(request.call())?;
                let parsed: ModelsResponse = serde_json::from_str(&text)
                    .map_err(|e| GenerationError::Decode(e.to_string()))?;
                Ok(parsed.data.into_iter().map(|m| m.id).collect())
            },
            GenerationError::is_retryable,
        )?;

        if models.iter().any(|id| id == &self.model_name) {
            info!("Generation service healthy, model {} available", self.model_name);
            Ok(models)
        } else {
            Err(Exhausted {
                attempts: 1,
                last_error: GenerationError::Status {
                    status: 404,
                    snippet: format!(
                        "model '{}' not served; available: {}",
                        self.model_name,
                        models.join(", ")
                    ),
                },
            })
        }
    }
}
