//! Server-sent-event plumbing shared by both adapters.
//!
//! Response bodies arrive in arbitrary byte chunks that rarely line up
//! with event boundaries. [`SseBuffer`] accumulates them and hands back
//! one `data:` payload per completed event; [`sse_response_stream`] wires
//! a buffer to an adapter's payload parser and guarantees the resulting
//! stream always ends with a `Done` chunk.

use crate::traits::from_reqwest;
use maestro_domain::error::Result;
use maestro_domain::stream::{BoxStream, StreamChunk};

/// Incremental SSE decoder.
///
/// Events are blocks of `field: value` lines terminated by a blank line.
/// Only `data:` fields matter to the chat protocols; an event carrying
/// several data lines yields them joined with `\n`, per the SSE spec.
/// CR bytes from `\r\n` framing are tolerated.
#[derive(Default)]
pub struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw body bytes (lossily decoded) to the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pop the next completed event's data payload, or `None` if no
    /// terminated event is buffered. Events without data (comments,
    /// keep-alives) are consumed and skipped.
    pub fn next_payload(&mut self) -> Option<String> {
        loop {
            let boundary = self.pending.find("\n\n")?;
            let block: String = self.pending.drain(..boundary + 2).collect();
            if let Some(payload) = data_payload(&block) {
                return Some(payload);
            }
        }
    }

    /// Treat the remaining buffer as a final, unterminated event. Called
    /// once when the body closes mid-event.
    pub fn take_tail(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.pending);
        data_payload(&tail)
    }
}

/// Collect the `data:` lines of one event block.
fn data_payload(block: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        let Some(value) = line.strip_prefix("data:") else { continue };
        let value = value.trim();
        if !value.is_empty() {
            lines.push(value);
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Turn an SSE `reqwest::Response` into a chunk stream via the adapter's
/// payload parser.
///
/// The parser is `FnMut` so the content-block adapter can keep tool-call
/// assembly state between payloads. A transport error ends the stream
/// immediately; a body that closes without the provider's terminal
/// signal gets a synthetic `Done` so consumers always see one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_payload: F,
) -> BoxStream<'static, Result<StreamChunk>>
where
    F: FnMut(&str) -> Vec<Result<StreamChunk>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut response = response;
        let mut buffer = SseBuffer::new();
        let mut saw_done = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => buffer.push(&bytes),
                Ok(None) => break,
                Err(e) => {
                    yield Err(from_reqwest(e));
                    return;
                }
            }
            while let Some(payload) = buffer.next_payload() {
                for chunk in parse_payload(&payload) {
                    saw_done |= matches!(&chunk, Ok(StreamChunk::Done { .. }));
                    yield chunk;
                }
            }
        }

        if let Some(payload) = buffer.take_tail() {
            for chunk in parse_payload(&payload) {
                saw_done |= matches!(&chunk, Ok(StreamChunk::Done { .. }));
                yield chunk;
            }
        }

        if !saw_done {
            yield Ok(StreamChunk::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &mut SseBuffer) -> Vec<String> {
        std::iter::from_fn(|| buffer.next_payload()).collect()
    }

    #[test]
    fn split_chunks_reassemble_across_the_boundary() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: {\"delta\":");
        assert_eq!(buffer.next_payload(), None);

        buffer.push(b"\"hi\"}\n");
        assert_eq!(buffer.next_payload(), None);

        buffer.push(b"\ndata: second\n\n");
        assert_eq!(drain(&mut buffer), vec![r#"{"delta":"hi"}"#, "second"]);
        assert_eq!(buffer.next_payload(), None);
    }

    #[test]
    fn non_data_fields_and_dataless_events_are_skipped() {
        let mut buffer = SseBuffer::new();
        buffer.push(b": keep-alive\n\nevent: ping\nid: 7\n\nretry: 3000\ndata: real\n\n");
        assert_eq!(drain(&mut buffer), vec!["real"]);
    }

    #[test]
    fn crlf_framing_is_tolerated() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: windows\r\n\ndata: style\r\n\n");
        assert_eq!(drain(&mut buffer), vec!["windows", "style"]);
    }

    #[test]
    fn multi_data_lines_join_per_event() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: first half\ndata: second half\n\n");
        assert_eq!(buffer.next_payload().as_deref(), Some("first half\nsecond half"));
    }

    #[test]
    fn tail_is_recovered_when_the_body_closes_mid_event() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data: complete\n\ndata: [DONE]");
        assert_eq!(buffer.next_payload().as_deref(), Some("complete"));
        assert_eq!(buffer.next_payload(), None);
        assert_eq!(buffer.take_tail().as_deref(), Some("[DONE]"));
        assert_eq!(buffer.take_tail(), None);
    }

    #[test]
    fn blank_data_values_do_not_produce_payloads() {
        let mut buffer = SseBuffer::new();
        buffer.push(b"data:\n\ndata:    \n\n");
        assert_eq!(buffer.next_payload(), None);
    }
}
