//! Split-system adapter: the system instruction travels in its own `system`
//! field, the remaining turns in `messages`.
//!
//! Text arrives in frames shaped like
//! `{"type":"content_block_delta","delta":{"type":"text_delta","text":"..."}}`;
//! every other frame (`message_start`, `ping`, `content_block_stop`, ...) is ignored.
//! The upstream closes the connection after `message_stop`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{
    delta_stream, ensure_success, with_exchange_log, CompletionProvider, CompletionRequest,
    DeltaStream, LlmError, Message, ProviderConfig,
};
use crate::audit::AuditLog;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a Message>,
}

pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
    audit: Option<Arc<dyn AuditLog>>,
}

impl AnthropicProvider {
    pub fn new(client: Client, config: ProviderConfig, audit: Option<Arc<dyn AuditLog>>) -> Self {
        Self {
            client,
            config,
            audit,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, LlmError> {
        let (system, turns) = request.split_system();
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
            system,
            messages: turns,
        };

        debug!(
            "Opening anthropic stream: model={}, turns={}",
            self.config.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let deltas = delta_stream(response.bytes_stream(), text_delta);
        Ok(match &self.audit {
            Some(audit) => with_exchange_log(
                deltas,
                Arc::clone(audit),
                self.config.kind,
                serde_json::to_value(&body).unwrap_or_default(),
            ),
            None => deltas,
        })
    }

    fn name(&self) -> &str {
        self.config.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Extracts `delta.text` from frames whose `delta.type` is `text_delta`.
fn text_delta(frame: &Value) -> Option<&str> {
    let delta = frame.get("delta")?;
    if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
        return None;
    }
    delta.get("text").and_then(Value::as_str)
}
