//! Session event types

use colloquy_ai::{Message, Provider, UsageRecord};
use serde::{Deserialize, Serialize};

/// Events emitted while a session handles a send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A send was accepted and the user message appended
    SendStart,

    /// A summarization pass started for `messages` old messages
    CompactionStart { messages: usize },

    /// A summary was recorded
    CompactionEnd {
        summarized: usize,
        compressed_through: usize,
    },

    /// Summarization failed; the turn goes out uncompressed
    CompactionFailed { message: String },

    /// A streamed reply started
    StreamStart,

    /// Streamed text fragment, in arrival order
    StreamDelta { text: String },

    /// The streaming buffer was cleared after its grace window
    StreamCleared,

    /// The assistant reply was appended to the log
    MessageEnd { message: Message },

    /// Usage totals changed for a provider
    UsageUpdated {
        provider: Provider,
        last_request: UsageRecord,
    },

    /// The conversation was cleared
    Cleared,

    /// The send failed
    Error { message: String },

    /// The send finished, successfully or not
    SendEnd,
}

impl SessionEvent {
    /// Check if this is the last event of a send
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::SendEnd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_send_end_is_terminal() {
        assert!(SessionEvent::SendEnd.is_terminal());
        assert!(!SessionEvent::Error { message: "x".into() }.is_terminal());
        assert!(!SessionEvent::MessageEnd { message: Message::assistant("hi") }.is_terminal());
    }

    #[test]
    fn test_serde_tagging() {
        let event = SessionEvent::CompactionEnd {
            summarized: 10,
            compressed_through: 20,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "compaction_end");
        assert_eq!(json["compressed_through"], 20);

        let usage = SessionEvent::UsageUpdated {
            provider: Provider::Yandex,
            last_request: UsageRecord::new(1, 2, 3),
        };
        let json = serde_json::to_value(&usage).unwrap();
        assert_eq!(json["provider"], "yandex");
        let back: SessionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, usage);
    }
}
