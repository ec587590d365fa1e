//! Wire-format normalizer for `text/event-stream` bodies.
//!
//! Provider streams and Quill's own outbound stream both frame payloads as
//! `data: <json>` lines. Network reads split lines at arbitrary points, so raw
//! bytes are buffered until a full line is available. Decoding happens per line,
//! which also keeps a multi-byte character split across two reads intact.

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::trace;

/// Payload of the line that ends a stream.
pub const DONE_MARKER: &str = "[DONE]";

/// A complete, meaningful line of an event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Json(Value),
    Done,
}

/// Longest partial line kept while waiting for its newline. Longer lines are
/// dropped whole, like any other unparseable frame.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental line splitter. Feed it every chunk read from the connection.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    /// Inside an oversized line; bytes are discarded up to the next newline.
    discarding: bool,
}

impl SseDecoder {
    /// Appends a chunk and returns the frames completed by it, in order.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<Frame> {
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    chunk = &chunk[end + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if end - start <= MAX_LINE_BYTES {
                if let Some(frame) = parse_line(&self.pending[start..end]) {
                    frames.push(frame);
                }
            } else {
                trace!("skipping event-stream line of {} bytes", end - start);
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_LINE_BYTES {
            trace!("discarding event-stream line longer than {MAX_LINE_BYTES} bytes");
            self.pending.clear();
            self.discarding = true;
        }
        frames
    }

    /// Flushes a trailing line that was never terminated by a newline.
    pub fn finish(&mut self) -> Option<Frame> {
        let line = std::mem::take(&mut self.pending);
        if self.discarding {
            self.discarding = false;
            return None;
        }
        parse_line(&line)
    }
}

/// Parses one line without its `\n`.
///
/// Blank lines, `:` comments and non-`data` fields (`event:`, `id:`) yield nothing,
/// as does a `data` payload that is not valid JSON.
pub fn parse_line(line: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(line);
    let line = line.strip_suffix('\r').unwrap_or(&line);

    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload == DONE_MARKER {
        return Some(Frame::Done);
    }

    match serde_json::from_str(payload) {
        Ok(value) => Some(Frame::Json(value)),
        Err(e) => {
            trace!("skipping malformed event-stream frame: {e}");
            None
        }
    }
}

/// Turns a byte stream into the JSON frames it carries.
///
/// The sequence ends at `data: [DONE]` or when the body ends; a transport error is
/// yielded once and ends it too. The body is owned by the returned stream, so it is
/// released exactly once whichever way the stream stops, including being dropped
/// early by its consumer.
pub fn json_frames<S, B, E>(body: S) -> impl Stream<Item = Result<Value, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for frame in decoder.push(chunk.as_ref()) {
                match frame {
                    Frame::Json(value) => yield Ok(value),
                    Frame::Done => return,
                }
            }
        }

        if let Some(Frame::Json(value)) = decoder.finish() {
            yield Ok(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;
    use std::convert::Infallible;

    #[test]
    fn test_oversized_line_is_dropped_and_decoding_resumes() {
        let mut decoder = SseDecoder::default();
        let filler = vec![b'x'; MAX_LINE_BYTES / 2 + 1];

        let mut first = b"data: ".to_vec();
        first.extend_from_slice(&filler);
        assert!(decoder.push(&first).is_empty());
        assert!(decoder.push(&filler).is_empty());
        assert!(decoder.pending.is_empty());
        assert!(decoder.push(&filler).is_empty());
        assert!(decoder.pending.is_empty());

        let frames = decoder.push(b"tail\ndata: {\"text\":\"ok\"}\n\n");
        assert_eq!(frames, vec![Frame::Json(json!({"text": "ok"}))]);
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, Infallible>> {
        let owned: Vec<Result<Vec<u8>, Infallible>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    async fn collect(parts: &[&str]) -> Vec<Value> {
        json_frames(chunks(parts))
            .map(|frame| frame.unwrap())
            .collect()
            .await
    }

    #[test]
    fn test_parse_line_variants() {
        assert_eq!(parse_line(b""), None);
        assert_eq!(parse_line(b"\r"), None);
        assert_eq!(parse_line(b": keep-alive"), None);
        assert_eq!(parse_line(b"event: content_block_delta"), None);
        assert_eq!(parse_line(b"data: [DONE]"), Some(Frame::Done));
        assert_eq!(parse_line(b"data: [DONE]\r"), Some(Frame::Done));
        assert_eq!(parse_line(b"data: {not json"), None);
        assert_eq!(
            parse_line(br#"data:{"a":1}"#),
            Some(Frame::Json(json!({"a": 1})))
        );
    }

    #[tokio::test]
    async fn test_reassembles_frame_split_across_reads() {
        let frames = collect(&[
            "data: {\"choices\":[{\"delta\":",
            "{\"content\":\"hi\"}}]}\n\n",
        ])
        .await;
        assert_eq!(frames, vec![json!({"choices": [{"delta": {"content": "hi"}}]})]);
    }

    #[tokio::test]
    async fn test_done_marker_ends_sequence() {
        let frames = collect(&["data: {\"n\":1}\n\ndata: [DONE]\n\ndata: {\"n\":2}\n\n"]).await;
        assert_eq!(frames, vec![json!({"n": 1})]);
    }

    #[tokio::test]
    async fn test_malformed_and_comment_lines_are_skipped() {
        let frames = collect(&[
            ": ping\n",
            "event: message_start\n",
            "data: {broken\n\n",
            "data: {\"n\":3}\n\n",
        ])
        .await;
        assert_eq!(frames, vec![json!({"n": 3})]);
    }

    #[tokio::test]
    async fn test_unterminated_trailing_line_is_flushed() {
        let frames = collect(&["data: {\"n\":1}\n\ndata: {\"n\":2}"]).await;
        assert_eq!(frames, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_reads() {
        let payload = "data: {\"text\":\"caf\u{e9} \u{1f680}\"}\n\n".as_bytes().to_vec();
        // Split inside the four-byte rocket.
        let split = payload.len() - 6;
        let parts: Vec<Result<Vec<u8>, Infallible>> =
            vec![Ok(payload[..split].to_vec()), Ok(payload[split..].to_vec())];
        let frames: Vec<Value> = json_frames(stream::iter(parts))
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames, vec![json!({"text": "caf\u{e9} \u{1f680}"})]);
    }

    #[test]
    fn test_decoding_is_insensitive_to_read_boundaries() {
        let body = "data: {\"a\":\"x\"}\r\n\r\n: c\ndata: {\"b\":[1,2]}\n\ndata: nope\n\ndata: {\"c\":\"\u{e9}\"}\n\ndata: [DONE]\n\n";
        let bytes = body.as_bytes();

        let mut whole = SseDecoder::default();
        let expected = whole.push(bytes);
        assert_eq!(expected.len(), 4);

        for split in 0..=bytes.len() {
            let mut decoder = SseDecoder::default();
            let mut frames = decoder.push(&bytes[..split]);
            frames.extend(decoder.push(&bytes[split..]));
            assert_eq!(frames, expected, "split at byte {split}");
        }

        let mut byte_by_byte = SseDecoder::default();
        let frames: Vec<Frame> = bytes
            .iter()
            .flat_map(|b| byte_by_byte.push(std::slice::from_ref(b)))
            .collect();
        assert_eq!(frames, expected);
    }

    #[tokio::test]
    async fn test_transport_error_ends_sequence() {
        let parts: Vec<Result<&[u8], &str>> = vec![
            Ok(&b"data: {\"n\":1}\n\n"[..]),
            Err("connection reset"),
            Ok(&b"data: {\"n\":2}\n\n"[..]),
        ];
        let items: Vec<Result<Value, &str>> = json_frames(stream::iter(parts)).collect().await;
        assert_eq!(items, vec![Ok(json!({"n": 1})), Err("connection reset")]);
    }
}
