//! Unified adapter for the OpenAI-compatible family (OpenAI, OpenRouter, Groq,
//! Mistral, Ollama): every message, system included, goes out as one ordered list
//! to `{base_url}/chat/completions`, and text arrives as
//! `choices[0].delta.content`. The stream ends with `data: [DONE]`.

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

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
    audit: Option<Arc<dyn AuditLog>>,
}

impl OpenAiProvider {
    pub fn new(client: Client, config: ProviderConfig, audit: Option<Arc<dyn AuditLog>>) -> Self {
        Self {
            client,
            config,
            audit,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<DeltaStream, LlmError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        };

        debug!(
            "Opening {} stream: model={}, messages={}",
            self.config.kind,
            self.config.model,
            request.messages.len()
        );

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }
        let response = ensure_success(builder.send().await?).await?;

        let deltas = delta_stream(response.bytes_stream(), content_delta);
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

fn content_delta(frame: &Value) -> Option<&str> {
    frame
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
}
