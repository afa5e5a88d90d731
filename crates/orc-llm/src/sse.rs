//! Generic `data: {...}` / `data: [DONE]` SSE line parser.
//!
//! Mirrors the exact wire format `async_streaming_agent.py`'s
//! `_stream_response_async` consumes: one line at a time, lines not starting
//! with `data: ` are ignored, `data: [DONE]` ends the stream, anything else
//! is decoded as JSON and `choices[0].delta.content` is yielded if present.
//! Malformed JSON on a single line is skipped rather than aborting the
//! stream, matching the original's `except json.JSONDecodeError: continue`.
//!
//! The buffer is only ever scanned past its previously-consumed prefix, so
//! total work across a whole response is `O(total bytes)`, not quadratic in
//! the number of lines.

use crate::provider::LlmError;
use crate::types::{SseChunk, StreamDelta};
use bytes::Bytes;
use futures::{Stream, StreamExt};

pub fn parse_sse_stream(
    bytes: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<StreamDelta, LlmError>> + Send {
    async_stream::stream! {
        let mut buf: Vec<u8> = Vec::new();
        let mut scanned: usize = 0;
        tokio::pin!(bytes);

        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(LlmError::StreamDisconnected(e.to_string()));
                    return;
                }
            };
            buf.extend_from_slice(&chunk);

            loop {
                let Some(rel_nl) = buf[scanned..].iter().position(|&b| b == b'\n') else {
                    break;
                };
                let line_end = scanned + rel_nl;
                let line = String::from_utf8_lossy(&buf[scanned..line_end]).trim().to_string();
                scanned = line_end + 1;

                if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                    let data = data.trim();
                    if data == "[DONE]" {
                        yield Ok(StreamDelta::Done);
                        break 'outer;
                    }
                    match serde_json::from_str::<SseChunk>(data) {
                        Ok(parsed) => {
                            if let Some(choice) = parsed.choices.into_iter().next() {
                                if let Some(content) = choice.delta.content {
                                    if !content.is_empty() {
                                        yield Ok(StreamDelta::Content(content));
                                    }
                                }
                            }
                        }
                        Err(_) => continue,
                    }
                }
            }

            // Compact the buffer once consumed data grows past a threshold so
            // memory doesn't grow with total stream length.
            if scanned > 64 * 1024 {
                buf.drain(0..scanned);
                scanned = 0;
            }
        }
    }
}
