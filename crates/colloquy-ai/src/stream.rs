//! Streaming event types and the SSE frame decoder

use crate::types::{Message, UsageRecord};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "data: [DONE]";

/// Longest line the decoder buffers while waiting for its newline
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Events emitted while a completion streams in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental fragment of assistant text
    Delta { text: String },
    /// Stream finished; carries usage if the provider reported it
    Done { usage: Option<UsageRecord> },
    /// Connection-level failure
    Error { message: String },
}

impl StreamEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// A stream of decoded completion events
pub type ChatEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

// Wire frames. Only the fields we consume are modelled; everything else is ignored.

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

impl From<StreamUsage> for UsageRecord {
    fn from(u: StreamUsage) -> Self {
        UsageRecord::new(u.prompt_tokens, u.completion_tokens, u.total_tokens)
    }
}

/// Line-oriented decoder for `data: {...}` event streams.
///
/// Bytes are buffered until a newline arrives, so a frame split across
/// transport chunks (or a UTF-8 sequence split mid-character) is decoded once
/// complete. Exactly one [`StreamEvent::Done`] is produced per decoder.
/// A line longer than [`MAX_LINE_BYTES`] is skipped like a malformed frame.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    /// Prefix of `pending` already searched for a newline
    scanned: usize,
    /// Dropping the rest of an oversized line
    discarding: bool,
    usage: Option<UsageRecord>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal event has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Usage captured so far
    pub fn usage(&self) -> Option<UsageRecord> {
        self.usage
    }

    /// Feed one raw transport chunk, returning the events it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                self.process_line(&buf[start..end], &mut events);
            }
            start = end + 1;
            self.scanned = start;
            if self.finished {
                self.scanned = 0;
                return events;
            }
        }

        buf.drain(..start);
        if buf.len() > MAX_LINE_BYTES {
            if !self.discarding {
                tracing::warn!(
                    "Skipping oversized SSE frame: no line break within {} bytes",
                    MAX_LINE_BYTES
                );
                self.discarding = true;
            }
            buf.clear();
        }
        self.scanned = buf.len();
        self.pending = buf;
        events
    }

    /// Flush at end of input. Decodes a trailing unterminated line and emits
    /// the terminal event if `[DONE]` never arrived.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let line = std::mem::take(&mut self.pending);
        self.scanned = 0;
        if !line.is_empty() && !self.discarding {
            self.process_line(&line, &mut events);
        }
        self.discarding = false;
        if !self.finished {
            tracing::debug!("Stream ended without [DONE] marker");
            self.finished = true;
            events.push(StreamEvent::Done { usage: self.usage });
        }
        events
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.strip_suffix('\r').unwrap_or(&*text);
        if line.is_empty() {
            return;
        }

        if line.contains(DONE_MARKER) {
            self.finished = true;
            events.push(StreamEvent::Done { usage: self.usage });
            return;
        }

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            tracing::trace!("Ignoring non-data SSE line: {}", line);
            return;
        };

        match serde_json::from_str::<StreamFrame>(payload) {
            Ok(frame) => {
                if let Some(content) = frame
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.as_deref())
                {
                    if !content.is_empty() {
                        events.push(StreamEvent::Delta {
                            text: content.to_string(),
                        });
                    }
                }
                // Usage usually rides on the last content frame, before [DONE]
                if let Some(usage) = frame.usage {
                    self.usage = Some(usage.into());
                }
            }
            Err(e) => {
                tracing::warn!("Skipping malformed SSE frame: {}", e);
            }
        }
    }
}

/// Decode a raw byte stream (e.g. `reqwest::Response::bytes_stream`) into
/// completion events. A transport error ends the stream with one
/// [`StreamEvent::Error`].
pub fn decode_byte_stream<S, B, E>(bytes: S) -> ChatEventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    Box::pin(stream! {
        let mut decoder = SseDecoder::new();
        let mut bytes = Box::pin(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in decoder.feed(chunk.as_ref()) {
                        yield event;
                    }
                    if decoder.is_finished() {
                        return;
                    }
                }
                Err(e) => {
                    yield StreamEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        for event in decoder.finish() {
            yield event;
        }
    })
}

/// Transient state of the completion currently streaming in
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingSession {
    text: String,
    is_active: bool,
    is_complete: bool,
    usage: Option<UsageRecord>,
}

impl StreamingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to an empty, active buffer for a new stream
    pub fn start(&mut self) {
        *self = Self {
            is_active: true,
            ..Self::default()
        };
    }

    /// Apply one event. Deltas append in arrival order; an error discards
    /// whatever was accumulated.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Delta { text } => {
                if !self.is_complete {
                    self.text.push_str(text);
                }
            }
            StreamEvent::Done { usage } => {
                self.is_active = false;
                self.is_complete = true;
                self.usage = *usage;
            }
            StreamEvent::Error { .. } => self.reset(),
        }
    }

    /// Clear the buffer and return to idle
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn usage(&self) -> Option<UsageRecord> {
        self.usage
    }

    /// Build the assistant message from the accumulated text
    pub fn to_message(&self) -> Message {
        Message::assistant(self.text.clone())
    }
}
