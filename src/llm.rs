//! LLM client abstraction with OpenAI and Anthropic implementations.
//!
//! This module provides a generic [`LlmClient`] trait for interacting with
//! chat models, along with concrete implementations:
//!
//! - [`OpenAiClient`]: Chat Completions API (default provider)
//! - [`AnthropicClient`]: Anthropic Messages API
//! - [`MockLlmClient`]: test double for unit tests
//!
//! Every provider payload is folded into plain text by [`normalize_content`]
//! before it leaves this module, so callers only ever see a [`Completion`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider's API key environment variable is not set.
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),

    /// HTTP or network error occurred.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API answered with a non-success status.
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Failed to parse the API response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Model returned no text content.
    #[error("Model returned empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Network failures, rate limiting and server-side errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-tagged message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ============================================================================
// Completion Type
// ============================================================================

/// The result of a successful LLM completion request.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The generated text from the model.
    pub text: String,
}

impl Completion {
    /// Build a completion from a raw provider payload.
    ///
    /// Returns [`LlmError::EmptyResponse`] when the payload carries no text.
    pub fn from_content(content: &Value) -> Result<Self, LlmError> {
        let text = normalize_content(content);
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(Self { text })
    }
}

/// Fold any provider content shape into a single string.
///
/// Strings pass through unchanged. Arrays of content parts are joined with
/// newlines, taking each part's `text` field when it has one. Objects yield
/// their `text` field or their JSON rendering.
pub fn normalize_content(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(normalize_content)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(obj) => match obj.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => content.to_string(),
        },
        other => other.to_string(),
    }
}

// ============================================================================
// LlmClient Trait
// ============================================================================

/// Generic interface for chat model clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for a system instruction and an ordered list of
    /// role-tagged messages. The last message is the one the model answers.
    async fn complete(&self, system: &str, messages: &[Message]) -> Result<Completion, LlmError>;
}

/// Sampling and transport options shared by the HTTP clients.
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Extra attempts after the first one, only for transient failures.
    pub max_retries: usize,
    pub timeout: Duration,
}

impl LlmOptions {
    pub fn openai_defaults() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 2048,
            max_retries: 2,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn anthropic_defaults() -> Self {
        Self {
            model: "claude-haiku-4-5".to_string(),
            ..Self::openai_defaults()
        }
    }
}

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Run `attempt` and retry transient failures with exponential backoff.
async fn with_retry<F, Fut>(max_retries: usize, attempt: F) -> Result<Completion, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Completion, LlmError>>,
{
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(250)
        .max_delay(Duration::from_secs(8))
        .map(jitter)
        .take(max_retries);

    RetryIf::start(strategy, attempt, |e: &LlmError| {
        let retry = e.is_transient();
        if retry {
            warn!(error = %e, "transient LLM failure, retrying");
        }
        retry
    })
    .await
}

async fn read_error_body(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    LlmError::Status { status, body }
}

// ============================================================================
// OpenAI Implementation
// ============================================================================

/// Client for the OpenAI Chat Completions API.
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    options: LlmOptions,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Value,
}

impl OpenAiClient {
    pub fn with_options(api_key: String, options: LlmOptions) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            client: build_http_client(options.timeout),
            options,
        }
    }

    async fn complete_once(&self, system: &str, messages: &[Message]) -> Result<Completion, LlmError> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(OpenAiMessage {
            role: "system",
            content: system,
        });
        wire.extend(messages.iter().map(|m| OpenAiMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        let request_body = OpenAiRequest {
            model: &self.options.model,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            messages: wire,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error_body(response).await);
        }

        let api_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;

        Completion::from_content(&choice.message.content)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system: &str, messages: &[Message]) -> Result<Completion, LlmError> {
        let completion = with_retry(self.options.max_retries, || {
            self.complete_once(system, messages)
        })
        .await?;
        debug!(model = %self.options.model, text = %completion.text, "openai completion");
        Ok(completion)
    }
}

// ============================================================================
// Anthropic API Implementation
// ============================================================================

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    api_key: String,
    options: LlmOptions,
    client: reqwest::Client,
}

/// Request body for the Anthropic Messages API.
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: &'a [Message],
}

/// Response from the Anthropic Messages API.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Value,
}

impl AnthropicClient {
    pub fn with_options(api_key: String, options: LlmOptions) -> Self {
        Self {
            api_key,
            client: build_http_client(options.timeout),
            options,
        }
    }

    async fn complete_once(&self, system: &str, messages: &[Message]) -> Result<Completion, LlmError> {
        let request_body = AnthropicRequest {
            model: &self.options.model,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            system,
            messages,
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(read_error_body(response).await);
        }

        let api_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Completion::from_content(&api_response.content)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, system: &str, messages: &[Message]) -> Result<Completion, LlmError> {
        let completion = with_retry(self.options.max_retries, || {
            self.complete_once(system, messages)
        })
        .await?;
        debug!(model = %self.options.model, text = %completion.text, "anthropic completion");
        Ok(completion)
    }
}

// ============================================================================
// Output Helpers
// ============================================================================

/// Strip markdown code fences from LLM output.
pub fn strip_markdown_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let after_first_fence = trimmed
            .find('\n')
            .map(|i| &trimmed[i + 1..])
            .unwrap_or(trimmed);
        if let Some(end) = after_first_fence.rfind("```") {
            return after_first_fence[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Find the first complete JSON object in model output, ignoring fences and
/// any prose before or after it.
pub fn extract_json_object(text: &str) -> Option<String> {
    let cleaned = strip_markdown_fences(text);
    cleaned.match_indices('{').find_map(|(start, _)| {
        let rest = &cleaned[start..];
        let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(_))) => Some(rest[..values.byte_offset()].to_string()),
            _ => None,
        }
    })
}

// ============================================================================
// Mock Implementation (Test Only)
// ============================================================================

/// Mock LLM client for testing. Returns pre-programmed responses in FIFO order
/// and records every request it receives.
#[cfg(test)]
pub struct MockLlmClient {
    /// Pre-programmed responses to return in FIFO order.
    pub responses: std::sync::Mutex<std::collections::VecDeque<Result<String, LlmError>>>,
    /// `(system, messages)` for each call, in call order.
    pub calls: std::sync::Mutex<Vec<(String, Vec<Message>)>>,
}

#[cfg(test)]
impl MockLlmClient {
    /// Create a new mock client with a sequence of successful responses.
    ///
    /// # Panics
    ///
    /// [`complete`](LlmClient::complete) panics when called more times
    /// than there are responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock that can also return scripted errors.
    pub fn with_results(results: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(results.into()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// System prompt of the n-th call.
    pub fn system_of(&self, call: usize) -> String {
        self.calls.lock().unwrap()[call].0.clone()
    }

    /// Messages of the n-th call.
    pub fn messages_of(&self, call: usize) -> Vec<Message> {
        self.calls.lock().unwrap()[call].1.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, system: &str, messages: &[Message]) -> Result<Completion, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), messages.to_vec()));

        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockLlmClient: no more responses available")?;

        Ok(Completion { text })
    }
}

// ============================================================================
// Tests
// ============================================================================
