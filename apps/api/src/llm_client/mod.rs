/// LLM Client: the single point of entry for all provider calls in Quill.
///
/// ARCHITECTURAL RULE: No other module may call a provider API directly.
/// Every generation goes through [`CompletionProvider::stream`], which yields
/// canonical [`TextDelta`]s whatever the provider's wire format.
///
/// Two wire formats exist: the split-system one (`anthropic`) and the unified
/// chat-completions one shared by the OpenAI-compatible family (`openai`).
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::audit::{AuditEntry, AuditLog};

pub mod anthropic;
pub mod openai;
pub mod sse;

use anthropic::AnthropicProvider;
use openai::OpenAiProvider;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on how much of an error body is echoed into an error message.
const MAX_ERROR_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no usable AI provider is configured")]
    Unavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Canonical request / response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// One provider-agnostic completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Separates the system instruction from the conversation turns.
    ///
    /// Requests carry at most one system message; should several appear they are
    /// joined so no instruction is lost.
    pub fn split_system(&self) -> (Option<String>, Vec<&Message>) {
        let mut system: Vec<&str> = Vec::new();
        let mut turns = Vec::new();
        for message in &self.messages {
            match message.role {
                Role::System => system.push(&message.content),
                Role::User | Role::Assistant => turns.push(message),
            }
        }
        let system = (!system.is_empty()).then(|| system.join("\n\n"));
        (system, turns)
    }
}

/// A fragment of generated text, in provider order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta(pub String);

impl TextDelta {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Lazy sequence of deltas. It ends without error on the provider's normal
/// terminal signal and yields at most one error, which ends it as well.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<TextDelta, LlmError>> + Send>>;

/// The provider capability. `AppState` carries it as `Arc<dyn CompletionProvider>`
/// so the handler can be driven by a scripted provider in tests.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Performs the handshake and returns the delta sequence.
    /// Fails with [`LlmError::Api`] when the upstream answers with a non-success status.
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, LlmError>;

    /// Provider kind, for logs.
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

// ────────────────────────────────────────────────────────────────────────────
// Provider kinds and configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// System instruction in a dedicated field, `delta.text` frames.
    SplitSystem,
    /// One homogeneous message list, `choices[0].delta.content` frames.
    Unified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    OpenRouter,
    Groq,
    Mistral,
    Ollama,
}

impl ProviderKind {
    /// Auto-detection order when `AI_PROVIDER` is unset.
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
        ProviderKind::OpenRouter,
        ProviderKind::Groq,
        ProviderKind::Mistral,
        ProviderKind::Ollama,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(ProviderKind::Anthropic),
            "openai" => Some(ProviderKind::OpenAi),
            "openrouter" => Some(ProviderKind::OpenRouter),
            "groq" => Some(ProviderKind::Groq),
            "mistral" => Some(ProviderKind::Mistral),
            "ollama" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Groq => "groq",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn wire_format(self) -> WireFormat {
        match self {
            ProviderKind::Anthropic => WireFormat::SplitSystem,
            _ => WireFormat::Unified,
        }
    }

    /// Environment variable holding the API key; `None` for keyless local servers.
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Groq => Some("GROQ_API_KEY"),
            ProviderKind::Mistral => Some("MISTRAL_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-sonnet-4-5",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::OpenRouter => "openai/gpt-4o-mini",
            ProviderKind::Groq => "llama-3.3-70b-versatile",
            ProviderKind::Mistral => "mistral-small-latest",
            ProviderKind::Ollama => "llama3.1",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::Mistral => "https://api.mistral.ai/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved once at start-up; never changes for the life of the process.
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
    /// Without trailing slash.
    pub base_url: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolves the provider from environment-style lookups.
    ///
    /// `AI_PROVIDER` selects the kind; when unset, the first kind in
    /// [`ProviderKind::ALL`] whose key variable is set wins. `AI_MODEL` and
    /// `AI_BASE_URL` override the built-in defaults. Returns `None` when no usable
    /// configuration exists.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let kind = match get("AI_PROVIDER") {
            Some(value) => match ProviderKind::parse(&value) {
                Some(kind) => kind,
                None => {
                    warn!("AI_PROVIDER '{value}' is not a known provider kind");
                    return None;
                }
            },
            None => ProviderKind::ALL
                .into_iter()
                .find(|kind| kind.api_key_var().and_then(|var| get(var)).is_some())?,
        };

        let api_key = match kind.api_key_var() {
            Some(var) => match get(var) {
                Some(key) => key.trim().to_string(),
                None => {
                    warn!("AI provider '{kind}' selected but {var} is not set");
                    return None;
                }
            },
            None => String::new(),
        };

        let model = get("AI_MODEL")
            .map(|m| m.trim().to_string())
            .unwrap_or_else(|| kind.default_model().to_string());
        let base_url = get("AI_BASE_URL")
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| kind.default_base_url().to_string());

        Some(Self {
            kind,
            api_key,
            model,
            base_url,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Provider union
// ────────────────────────────────────────────────────────────────────────────

/// One variant per wire format. Adding a provider family means adding a variant.
pub enum Provider {
    Anthropic(AnthropicProvider),
    OpenAiCompatible(OpenAiProvider),
}

impl Provider {
    /// Builds the adapter for `config.kind`. `audit` is passed only when the debug
    /// flag is on; the adapter then logs each full exchange once its sequence ends.
    pub fn from_config(
        config: ProviderConfig,
        audit: Option<Arc<dyn AuditLog>>,
    ) -> Result<Self, LlmError> {
        // No overall timeout: streams are long-lived and bounded by the handler's deadline.
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(match config.kind.wire_format() {
            WireFormat::SplitSystem => {
                Provider::Anthropic(AnthropicProvider::new(client, config, audit))
            }
            WireFormat::Unified => {
                Provider::OpenAiCompatible(OpenAiProvider::new(client, config, audit))
            }
        })
    }
}

#[async_trait]
impl CompletionProvider for Provider {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, LlmError> {
        match self {
            Provider::Anthropic(p) => p.stream(request).await,
            Provider::OpenAiCompatible(p) => p.stream(request).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Provider::Anthropic(p) => p.name(),
            Provider::OpenAiCompatible(p) => p.name(),
        }
    }

    fn model(&self) -> &str {
        match self {
            Provider::Anthropic(p) => p.model(),
            Provider::OpenAiCompatible(p) => p.model(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared adapter plumbing
// ────────────────────────────────────────────────────────────────────────────

/// Turns a non-success handshake into [`LlmError::Api`], keeping the upstream's
/// own error message when it sent one.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(LlmError::Api {
        status: status.as_u16(),
        message: upstream_message(&body),
    })
}

/// Both wire formats report errors as `{"error": {"message": ...}}`.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_CHARS).collect())
}

/// Runs an upstream SSE body through the normalizer and keeps the text that
/// `extract` finds in each frame. Frames without text are skipped.
pub(crate) fn delta_stream<S>(body: S, extract: fn(&Value) -> Option<&str>) -> DeltaStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let frames = sse::json_frames(body);
    Box::pin(stream! {
        let mut frames = Box::pin(frames);
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => {
                    if let Some(text) = extract(&frame).filter(|t| !t.is_empty()) {
                        yield Ok(TextDelta(text.to_string()));
                    }
                }
                Err(e) => {
                    yield Err(LlmError::Http(e));
                    return;
                }
            }
        }
    })
}

/// Passes deltas through untouched and, once the sequence is over, records the
/// request together with everything that was generated.
pub(crate) fn with_exchange_log(
    deltas: DeltaStream,
    audit: Arc<dyn AuditLog>,
    provider: ProviderKind,
    request: Value,
) -> DeltaStream {
    Box::pin(stream! {
        let mut deltas = deltas;
        let mut response = String::new();
        while let Some(item) = deltas.next().await {
            let failed = item.is_err();
            if let Ok(delta) = &item {
                response.push_str(delta.as_str());
            }
            yield item;
            if failed {
                break;
            }
        }
        audit.record(&AuditEntry::exchange(provider.as_str(), request, response));
    })
}
