//! Client-side consumer of the describe stream.
//!
//! `DraftAssistant` owns one draft field and at most one in-flight generation.
//! States: `Idle --start--> Generating --end--> Reviewing | Declined`,
//! `Generating --cancel--> Idle` (restored), `Reviewing --accept--> Idle` (kept),
//! `Reviewing --decline--> Idle` (restored).
//!
//! The text present before a generation starts is kept aside until the caller
//! accepts or declines, so every failure path can put it back.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::generation::events::OutboundEvent;
use crate::generation::models::DescribeBody;
use crate::generation::prompts::is_refusal;
use crate::llm_client::sse::SseDecoder;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("generation failed: {0}")]
    Stream(String),

    #[error("stream ended before completion")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Idle,
    Generating,
    Reviewing,
    /// Idle after an off-topic refusal; the draft has been restored.
    Declined,
}

/// User-facing warning left by the last generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    OffTopic,
    Failed(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::OffTopic => {
                "That instruction is not about this item's description, so the text was left unchanged."
            }
            Notice::Failed(_) => "The description could not be generated. Your text was restored.",
        }
    }
}

/// How a `start` call ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A generation was already running; nothing happened.
    Ignored,
    Reviewing,
    Declined,
    Cancelled,
}

#[derive(Debug)]
struct Inner {
    state: ReviewState,
    draft: String,
    /// Snapshot taken by `start`, held until accept, decline or rollback.
    previous: Option<String>,
    notice: Option<Notice>,
    /// Bumped on every start and cancel; fragments from an older value are dropped.
    generation: u64,
    cancel: Option<CancellationToken>,
}

impl Inner {
    fn restore(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.draft = previous;
        }
    }
}

/// Handle to one draft field. Clones share the same draft, so one task can
/// `cancel` while another awaits `start`.
#[derive(Debug, Clone)]
pub struct DraftAssistant {
    http: Client,
    endpoint: String,
    inner: Arc<Mutex<Inner>>,
}

impl DraftAssistant {
    /// `base_url` is the API root, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str, project_id: &str, draft: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: format!(
                "{}/api/v1/projects/{project_id}/describe",
                base_url.trim_end_matches('/')
            ),
            inner: Arc::new(Mutex::new(Inner {
                state: ReviewState::Idle,
                draft: draft.into(),
                previous: None,
                notice: None,
                generation: 0,
                cancel: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ReviewState {
        self.lock().state
    }

    pub fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.lock().notice.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.state() == ReviewState::Generating
    }

    /// Replaces the draft, as the user typing would. Ignored while generating.
    pub fn set_draft(&self, text: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.state == ReviewState::Generating {
            return false;
        }
        inner.draft = text.into();
        true
    }

    /// Generates into the draft.
    ///
    /// When `payload` has no description the current draft is sent as one. On
    /// `Err` the draft has already been restored and a `Failed` notice recorded.
    pub async fn start(&self, mut payload: DescribeBody) -> Result<Outcome, ClientError> {
        let (generation, token) = {
            let mut inner = self.lock();
            if inner.state == ReviewState::Generating {
                return Ok(Outcome::Ignored);
            }
            let previous = std::mem::take(&mut inner.draft);
            if payload.description.is_none() && !previous.trim().is_empty() {
                payload.description = Some(previous.clone());
            }
            inner.previous = Some(previous);
            inner.state = ReviewState::Generating;
            inner.notice = None;
            inner.generation += 1;
            let token = CancellationToken::new();
            inner.cancel = Some(token.clone());
            (inner.generation, token)
        };
        let _in_flight = InFlight {
            inner: self.inner.clone(),
            generation,
        };

        let result = tokio::select! {
            _ = token.cancelled() => return Ok(Outcome::Cancelled),
            result = self.consume(generation, &payload) => result,
        };

        let mut inner = self.lock();
        if inner.generation != generation {
            return Ok(Outcome::Cancelled);
        }
        inner.cancel = None;

        match result {
            Ok(()) if is_refusal(&inner.draft) => {
                inner.restore();
                inner.state = ReviewState::Declined;
                inner.notice = Some(Notice::OffTopic);
                Ok(Outcome::Declined)
            }
            Ok(()) => {
                inner.state = ReviewState::Reviewing;
                Ok(Outcome::Reviewing)
            }
            Err(e) => {
                warn!("Description generation failed: {e}");
                inner.restore();
                inner.state = ReviewState::Idle;
                inner.notice = Some(Notice::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Aborts the in-flight generation and restores the snapshot. Returns
    /// `false` when nothing was generating.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != ReviewState::Generating {
            return false;
        }
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        inner.generation += 1;
        inner.restore();
        inner.state = ReviewState::Idle;
        debug!("Description generation cancelled");
        true
    }

    /// Keeps the generated draft.
    pub fn accept(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            ReviewState::Reviewing | ReviewState::Declined => {
                inner.previous = None;
                inner.state = ReviewState::Idle;
                true
            }
            ReviewState::Idle | ReviewState::Generating => false,
        }
    }

    /// Throws the generated draft away.
    pub fn decline(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            ReviewState::Reviewing => {
                inner.restore();
                inner.state = ReviewState::Idle;
                true
            }
            ReviewState::Declined => {
                inner.state = ReviewState::Idle;
                true
            }
            ReviewState::Idle | ReviewState::Generating => false,
        }
    }

    async fn consume(&self, generation: u64, payload: &DescribeBody) -> Result<(), ClientError> {
        let response = self.http.post(&self.endpoint).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        while let Some(chunk) = body.next().await {
            for frame in decoder.push(&chunk?) {
                if self.apply(generation, OutboundEvent::from_frame(frame))? {
                    return Ok(());
                }
            }
        }
        if let Some(frame) = decoder.finish() {
            if self.apply(generation, OutboundEvent::from_frame(frame))? {
                return Ok(());
            }
        }
        Err(ClientError::Truncated)
    }

    /// Applies one event to the draft. `Ok(true)` once the terminal frame arrives.
    fn apply(&self, generation: u64, event: Option<OutboundEvent>) -> Result<bool, ClientError> {
        match event {
            Some(OutboundEvent::Text(text)) => {
                let mut inner = self.lock();
                if inner.generation == generation {
                    inner.draft.push_str(&text);
                }
                Ok(false)
            }
            Some(OutboundEvent::Error(message)) => Err(ClientError::Stream(message)),
            Some(OutboundEvent::Done) => Ok(true),
            None => Ok(false),
        }
    }
}

/// Rolls back a generation whose `start` future was dropped mid-flight.
struct InFlight {
    inner: Arc<Mutex<Inner>>,
    generation: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.generation == self.generation && inner.state == ReviewState::Generating {
            inner.cancel = None;
            inner.restore();
            inner.state = ReviewState::Idle;
        }
    }
}

/// Reads `{"error": {"message"}}`, falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
