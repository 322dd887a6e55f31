//! Server-sent event parsing for `streamRawPredict`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

use crate::error::AnthropicVertexError;
use crate::types::{ContentDelta, StopReason, StreamEvent, Usage};

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// A chunk from the streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Next piece of generated text, in order
    TextDelta { text: String },
    /// Stream completed
    Done {
        stop_reason: Option<StopReason>,
        output_tokens: Option<u32>,
    },
}

/// Ordered stream of [`StreamChunk`]s parsed from an SSE body.
///
/// Error events inside the stream are surfaced as `Err`, classified so that
/// `overloaded_error` / `rate_limit_error` become
/// [`AnthropicVertexError::Throttled`].
pub struct StreamingResponse {
    inner: ByteStream,
    /// Undecoded SSE text waiting for a blank-line terminator
    buffer: String,
    /// Bytes of a UTF-8 sequence split across network chunks
    pending_bytes: Vec<u8>,
    done: bool,
}

impl StreamingResponse {
    /// Wrap a reqwest response body.
    pub fn new(response: reqwest::Response) -> Self {
        tracing::debug!(
            "StreamingResponse::new - content-type: {:?}",
            response.headers().get("content-type")
        );
        Self::from_byte_stream(response.bytes_stream())
    }

    /// Wrap any byte stream (used directly by tests).
    pub fn from_byte_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            buffer: String::new(),
            pending_bytes: Vec::new(),
            done: false,
        }
    }

    /// Parse one SSE frame into an event.
    ///
    /// Only `data: ` at the start of a line counts; streamed text may itself
    /// contain the string "data: ".
    fn parse_sse_frame(frame: &str) -> Option<Result<StreamEvent, AnthropicVertexError>> {
        let frame = frame.trim();
        if frame.is_empty() || frame.starts_with(':') {
            return None;
        }

        let data = frame
            .lines()
            .filter_map(|line| line.trim_end_matches('\r').strip_prefix("data: "))
            .last()?
            .trim();

        if data == "[DONE]" {
            return None;
        }

        match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!(
                    "SSE: failed to parse event: {} - data: {}",
                    e,
                    &data[..data.len().min(200)]
                );
                Some(Err(AnthropicVertexError::ParseError(format!(
                    "Failed to parse stream event: {}",
                    e
                ))))
            }
        }
    }

    fn event_to_chunk(&mut self, event: StreamEvent) -> Option<Result<StreamChunk, AnthropicVertexError>> {
        match event {
            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ContentDelta::TextDelta { text } => Some(Ok(StreamChunk::TextDelta { text })),
                ContentDelta::Other => None,
            },
            StreamEvent::MessageDelta { delta, usage } => {
                tracing::debug!(
                    "SSE: message_delta stop_reason={:?} output_tokens={}",
                    delta.stop_reason,
                    usage.output_tokens
                );
                Some(Ok(done_chunk(delta.stop_reason, Some(usage))))
            }
            StreamEvent::MessageStop => {
                self.done = true;
                None
            }
            StreamEvent::Error { error } => {
                tracing::error!("SSE: error type={} message={}", error.error_type, error.message);
                self.done = true;
                Some(Err(AnthropicVertexError::from_stream_error(
                    &error.error_type,
                    error.message,
                )))
            }
            StreamEvent::MessageStart { .. }
            | StreamEvent::ContentBlockStart { .. }
            | StreamEvent::ContentBlockStop { .. }
            | StreamEvent::Ping => None,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending_bytes.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending_bytes) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending_bytes.clear();
            }
            Err(e) => {
                // Keep an incomplete trailing sequence for the next chunk.
                let valid = e.valid_up_to();
                if e.error_len().is_some() {
                    tracing::warn!("SSE: dropping invalid UTF-8 in stream");
                    self.pending_bytes.clear();
                    return;
                }
                let text = String::from_utf8_lossy(&self.pending_bytes[..valid]).into_owned();
                self.buffer.push_str(&text);
                self.pending_bytes.drain(..valid);
            }
        }
    }
}

fn done_chunk(stop_reason: Option<StopReason>, usage: Option<Usage>) -> StreamChunk {
    StreamChunk::Done {
        stop_reason,
        output_tokens: usage.map(|u| u.output_tokens),
    }
}

impl Stream for StreamingResponse {
    type Item = Result<StreamChunk, AnthropicVertexError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let frame = self.buffer[..pos].to_string();
                self.buffer.drain(..pos + 2);

                if let Some(result) = Self::parse_sse_frame(&frame) {
                    let chunk = match result {
                        Ok(event) => self.event_to_chunk(event),
                        Err(e) => Some(Err(e)),
                    };
                    if let Some(chunk) = chunk {
                        return Poll::Ready(Some(chunk));
                    }
                }
                continue;
            }

            if self.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.push_bytes(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    tracing::error!("SSE: transport error: {}", e);
                    self.done = true;
                    return Poll::Ready(Some(Err(AnthropicVertexError::StreamError(
                        e.to_string(),
                    ))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if self.buffer.trim().is_empty() {
                        return Poll::Ready(None);
                    }
                    // Flush a final frame that was not blank-line terminated.
                    self.buffer.push_str("\n\n");
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
