//! Outbound event framing, shared by the server (encode) and the client
//! consumer (decode).
//!
//! `data: {"text": "..."}\n\n`, `data: {"error": "..."}\n\n`, and the
//! terminal `data: [DONE]\n\n`.

use bytes::Bytes;
use serde_json::{json, Value};

use crate::llm_client::sse::{Frame, DONE_MARKER};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    Text(String),
    Error(String),
    Done,
}

impl OutboundEvent {
    pub fn encode(&self) -> Bytes {
        match self {
            OutboundEvent::Text(text) => data_frame(&json!({ "text": text })),
            OutboundEvent::Error(message) => data_frame(&json!({ "error": message })),
            OutboundEvent::Done => Bytes::from(format!("data: {DONE_MARKER}\n\n")),
        }
    }

    /// Maps a decoded frame back to an event. Frames with neither a string
    /// `text` nor a string `error` field are not events.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Done => Some(OutboundEvent::Done),
            Frame::Json(value) => {
                if let Some(message) = value.get("error").and_then(Value::as_str) {
                    Some(OutboundEvent::Error(message.to_string()))
                } else {
                    value
                        .get("text")
                        .and_then(Value::as_str)
                        .map(|text| OutboundEvent::Text(text.to_string()))
                }
            }
        }
    }
}

/// JSON is written compactly, so embedded newlines are escaped and a frame is
/// always a single `data:` line.
fn data_frame(value: &Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}
