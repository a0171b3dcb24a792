//! Conversation state: message log, summary ledger, and in-flight flags.

use chrono::{DateTime, Utc};
use colloquy_ai::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A compressed span of consecutive messages from the start of the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub content: String,
    /// Number of original messages this summary stands in for (at least 1)
    pub original_message_count: usize,
    pub created_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn new(content: impl Into<String>, original_message_count: usize) -> Self {
        Self {
            content: content.into(),
            original_message_count,
            created_at: Utc::now(),
        }
    }
}

/// How history is reduced before it is sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionPolicy {
    /// Send the whole history
    #[default]
    None,
    /// Send only the most recent window
    Truncate,
    /// Fold old messages into summaries
    Summarize,
}

impl CompressionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionPolicy::None => "none",
            CompressionPolicy::Truncate => "truncate",
            CompressionPolicy::Summarize => "summarize",
        }
    }

    pub fn all() -> [CompressionPolicy; 3] {
        [
            CompressionPolicy::None,
            CompressionPolicy::Truncate,
            CompressionPolicy::Summarize,
        ]
    }
}

impl FromStr for CompressionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(CompressionPolicy::None),
            "truncate" | "cut" => Ok(CompressionPolicy::Truncate),
            "summarize" | "summary" => Ok(CompressionPolicy::Summarize),
            other => Err(format!(
                "unknown policy: {} (expected none, truncate or summarize)",
                other
            )),
        }
    }
}

impl fmt::Display for CompressionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Total number of messages covered by a ledger
pub fn ledger_total(summaries: &[ConversationSummary]) -> usize {
    summaries.iter().map(|s| s.original_message_count).sum()
}

/// Conversation state: messages, summaries, and the flags a UI needs to
/// disable input while a send is in flight.
///
/// The compressed-through cursor is kept private so it can only move
/// together with the ledger.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Conversation messages, oldest first
    pub messages: Vec<Message>,
    summaries: Vec<ConversationSummary>,
    compressed_through: usize,
    /// Waiting for a blocking reply (or for the first streamed byte)
    pub is_loading: bool,
    /// A streamed reply is being received
    pub is_streaming: bool,
    /// A summarization request is in flight
    pub is_summarizing: bool,
    /// Last error
    pub error: Option<String>,
}

impl Conversation {
    /// Rebuild state from persisted data. A ledger that claims to cover more
    /// messages than exist is discarded.
    pub fn restore(messages: Vec<Message>, summaries: Vec<ConversationSummary>) -> Self {
        let covered = ledger_total(&summaries);
        let summaries = if covered > messages.len() {
            tracing::warn!(
                "Persisted summaries cover {} messages but only {} exist, discarding them",
                covered,
                messages.len()
            );
            Vec::new()
        } else {
            summaries
        };

        Self {
            compressed_through: ledger_total(&summaries),
            messages,
            summaries,
            ..Self::default()
        }
    }

    /// Summaries in ledger order
    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    /// Number of leading messages represented by summaries
    pub fn compressed_through(&self) -> usize {
        self.compressed_through
    }

    /// Messages not yet represented by any summary
    pub fn uncompressed_count(&self) -> usize {
        self.messages.len().saturating_sub(self.compressed_through)
    }

    /// Append a summary and advance the cursor past the span it covers.
    /// Returns `false` (and changes nothing) if the span would run past the
    /// end of the log.
    pub fn record_summary(&mut self, summary: ConversationSummary) -> bool {
        let end = self.compressed_through + summary.original_message_count;
        if summary.original_message_count == 0 || end > self.messages.len() {
            tracing::warn!(
                "Rejecting summary of {} messages at cursor {} (log has {})",
                summary.original_message_count,
                self.compressed_through,
                self.messages.len()
            );
            return false;
        }
        self.summaries.push(summary);
        self.compressed_through = end;
        true
    }

    /// Drop the most recent message unless it is already covered by a summary
    pub fn pop_uncompressed(&mut self) -> Option<Message> {
        if self.messages.len() > self.compressed_through {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Empty the log and the ledger together
    pub fn clear(&mut self) {
        self.messages.clear();
        self.summaries.clear();
        self.compressed_through = 0;
        self.error = None;
    }

    /// Whether any request is in flight
    pub fn is_busy(&self) -> bool {
        self.is_loading || self.is_streaming || self.is_summarizing
    }
}
