//! Dialogue engine: conversational completion backend
//!
//! Provides a `DialogueEngine` trait that opens per-subject `DialogueSession`s,
//! with an implementation backed by the Gemini `generateContent` API. A session
//! owns the running dialogue history; the engine only carries credentials and
//! the persona instructions every session is primed with.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::EngineConfig;

// ============================================================================
// Traits
// ============================================================================

/// Factory for dialogue sessions.
pub trait DialogueEngine: Send + Sync {
    /// Start a fresh dialogue context primed with the persona instructions.
    fn open_session(&self) -> Box<dyn DialogueSession>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// One subject's accumulated dialogue state.
#[async_trait]
pub trait DialogueSession: Send {
    /// Send `message` and return the engine's reply. On error the session's
    /// context is left exactly as it was before the call.
    async fn advance(&mut self, message: &str) -> Result<String, EngineError>;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response contained no reply text")]
    MissingReply,

    #[error("Missing API key")]
    MissingApiKey,
}

// ============================================================================
// Config
// ============================================================================

/// Gemini chat client configuration
#[derive(Debug, Clone)]
pub struct GeminiChatConfig {
    pub api_key: String,
    pub model: String,
    pub persona: String,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GeminiChatConfig {
    /// Build from the `[engine]` section. The key falls back to `GEMINI_API_KEY`.
    pub fn from_engine_config(
        api_key: Option<String>,
        engine: &EngineConfig,
        persona: String,
    ) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: engine.model.clone(),
            persona,
            timeout: Duration::from_secs(engine.request_timeout_seconds),
            max_retries: engine.max_retries,
            retry_delay_ms: engine.retry_delay_ms,
        }
    }
}

// ============================================================================
// Gemini API structs
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: &'a GeminiContent,
    contents: &'a [GeminiContent],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiChatClient
// ============================================================================

/// Gemini chat engine: opens sessions that call `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiChatClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    client: Client,
    config: GeminiChatConfig,
    base_url: String,
    system_instruction: GeminiContent,
}

impl GeminiChatClient {
    pub fn new(config: GeminiChatConfig) -> Result<Self, EngineError> {
        Self::with_base_url(
            config,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    /// Create a client with a custom base URL (for testing / proxies)
    pub fn with_base_url(config: GeminiChatConfig, base_url: String) -> Result<Self, EngineError> {
        if config.api_key.is_empty() {
            return Err(EngineError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        let system_instruction = GeminiContent::text(None, &config.persona);

        Ok(Self {
            inner: Arc::new(ClientInner {
                client,
                config,
                base_url: base_url.trim_end_matches('/').to_string(),
                system_instruction,
            }),
        })
    }

    async fn generate(&self, contents: &[GeminiContent]) -> Result<String, EngineError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.inner.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.inner.config.max_retries);

        Retry::spawn(retry_strategy, || self.generate_once(contents))
            .await
            .inspect_err(|e| {
                tracing::error!(
                    model = %self.inner.config.model,
                    error = %e,
                    "Gemini generateContent failed"
                );
            })
    }

    async fn generate_once(&self, contents: &[GeminiContent]) -> Result<String, EngineError> {
        let inner = &self.inner;
        let url = format!(
            "{}/models/{}:generateContent",
            inner.base_url, inner.config.model
        );

        let request = GenerateContentRequest {
            system_instruction: &inner.system_instruction,
            contents,
        };

        let response = inner
            .client
            .post(&url)
            .header("x-goog-api-key", &inner.config.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::warn!(code = code, message = %message, "Gemini API error");

            return Err(EngineError::Api { code, message });
        }

        let body: GenerateContentResponse = response.json().await?;
        extract_reply(body)
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_reply(body: GenerateContentResponse) -> Result<String, EngineError> {
    let content = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .ok_or(EngineError::MissingReply)?;

    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    if text.is_empty() {
        return Err(EngineError::MissingReply);
    }
    Ok(text)
}

impl DialogueEngine for GeminiChatClient {
    fn open_session(&self) -> Box<dyn DialogueSession> {
        Box::new(GeminiChatSession {
            client: self.clone(),
            history: Vec::new(),
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Per-subject history of user / model turns.
pub struct GeminiChatSession {
    client: GeminiChatClient,
    history: Vec<GeminiContent>,
}

impl GeminiChatSession {
    #[cfg(test)]
    fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[async_trait]
impl DialogueSession for GeminiChatSession {
    async fn advance(&mut self, message: &str) -> Result<String, EngineError> {
        let mut contents = self.history.clone();
        contents.push(GeminiContent::text(Some("user"), message));

        let reply = self.client.generate(&contents).await?;

        contents.push(GeminiContent::text(Some("model"), &reply));
        self.history = contents;
        Ok(reply)
    }
}

// ============================================================================
// TESTS
// ============================================================================
