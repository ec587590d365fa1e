//! Re-encodes a provider's delta sequence as the outbound event stream.
//!
//! Once the response is committed nothing may escape as an error: every path
//! ends with exactly one terminal frame, `{error}` or `[DONE]`, and nothing is
//! sent after it. A client that hangs up simply drops the stream, which drops the
//! upstream connection with it.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog};
use crate::errors::AppError;
use crate::generation::events::OutboundEvent;
use crate::generation::prompts::is_refusal;
use crate::llm_client::DeltaStream;

/// Sent to the client when the provider fails mid-stream; details go to the log.
pub const STREAM_FAILED_MESSAGE: &str = "The AI provider stopped responding. Please try again.";
pub const TIMED_OUT_MESSAGE: &str = "generation timed out";

pub struct RelayOptions {
    /// Correlates the log lines of one generation.
    pub id: Uuid,
    /// Maximum duration of the whole stream.
    pub timeout: Duration,
    /// Audit label of the prompt source (see `PromptMode`'s `Display`).
    pub source: String,
    pub audit: Arc<dyn AuditLog>,
}

/// Logs a disconnect if the stream is dropped before its terminal frame.
struct DisconnectGuard {
    id: Uuid,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Client disconnected before generation {} finished", self.id);
        }
    }
}

pub fn relay(
    deltas: DeltaStream,
    options: RelayOptions,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream! {
        let RelayOptions { id, timeout, source, audit } = options;
        let started = Instant::now();
        // A timeout too large to represent means no deadline at all.
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        let mut guard = DisconnectGuard { id, finished: false };
        let mut deltas = deltas;
        let mut text = String::new();
        let mut fragments = 0usize;

        loop {
            let next = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, deltas.next()).await,
                None => Ok(deltas.next().await),
            };
            match next {
                Ok(Some(Ok(delta))) => {
                    fragments += 1;
                    text.push_str(delta.as_str());
                    yield Ok(OutboundEvent::Text(delta.into_string()).encode());
                }
                Ok(Some(Err(e))) => {
                    warn!("Generation {id} failed after {fragments} fragments: {e}");
                    guard.finished = true;
                    yield Ok(OutboundEvent::Error(STREAM_FAILED_MESSAGE.to_string()).encode());
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Generation {id} exceeded {}s after {fragments} fragments",
                        timeout.as_secs()
                    );
                    guard.finished = true;
                    yield Ok(OutboundEvent::Error(TIMED_OUT_MESSAGE.to_string()).encode());
                    return;
                }
            }
        }

        if is_refusal(&text) {
            info!("Generation {id} refused as off-topic");
            debug!("Generation {id} refusal source: {source}");
            audit.record(&AuditEntry::refusal(source.as_str()));
        }

        info!(
            "Generation {id} completed: fragments={fragments}, chars={}, elapsed_ms={}",
            text.chars().count(),
            started.elapsed().as_millis()
        );

        guard.finished = true;
        yield Ok(OutboundEvent::Done.encode());
    }
}

/// Wraps the frame stream in a committed `text/event-stream` response.
pub fn event_stream_response<S>(frames: S) -> Result<Response, AppError>
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"))
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .header(header::CONNECTION, HeaderValue::from_static("keep-alive"))
        // Stops reverse proxies from buffering the stream.
        .header("x-accel-buffering", HeaderValue::from_static("no"))
        .body(Body::from_stream(frames))
        .map_err(|e| AppError::Internal(e.into()))
}
