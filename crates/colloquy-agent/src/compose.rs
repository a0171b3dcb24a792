//! Context composition: the exact message sequence sent for a turn.
//!
//! Everything here is pure. The same history, ledger, cursor and options
//! always produce the same output.

use colloquy_ai::Message;

use crate::conversation::{CompressionPolicy, ConversationSummary};

/// Default number of recent messages kept verbatim
pub const DEFAULT_WINDOW_SIZE: usize = 10;

const SUMMARY_HEADER: &str = "Below is a brief summary of the earlier part of the conversation. \
Use it as context for your answers.\n\n";

/// Injected ahead of the context when strict mode is on. Never persisted.
pub const STRICT_MODE_INSTRUCTION: &str = "\
ANSWER STRICTLY IN THIS FORMAT:
1. A short answer (at most 10 words for the whole answer).
2. Always finish with the word 'END' if you managed to fit the answer into the limit.
3. After the word STOP you must stop answering even if you have not finished.
Use bulleted lists only.";

/// Options that shape a composed context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeOptions {
    pub policy: CompressionPolicy,
    pub strict_mode: bool,
    /// Number of most recent messages sent verbatim under `truncate`
    pub window_size: usize,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            policy: CompressionPolicy::None,
            strict_mode: false,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// Build the messages to transmit for the current turn
pub fn compose(
    history: &[Message],
    summaries: &[ConversationSummary],
    compressed_through: usize,
    options: &ComposeOptions,
) -> Vec<Message> {
    let mut context = match options.policy {
        CompressionPolicy::None => history.to_vec(),
        CompressionPolicy::Truncate => truncate(history, options.window_size).to_vec(),
        CompressionPolicy::Summarize => {
            let start = compressed_through.min(history.len());
            let mut out = Vec::with_capacity(history.len() - start + 1);
            out.extend(summary_message(summaries));
            out.extend_from_slice(&history[start..]);
            out
        }
    };

    if options.strict_mode {
        context.insert(0, Message::system(STRICT_MODE_INSTRUCTION));
    }

    context
}

/// The last `window` messages, advanced past any leading message a provider
/// would refuse as the opening turn. May be empty.
pub fn truncate(history: &[Message], window: usize) -> &[Message] {
    let start = history.len().saturating_sub(window);
    let tail = &history[start..];
    let open = tail
        .iter()
        .position(|m| m.role.can_open_context())
        .unwrap_or(tail.len());
    &tail[open..]
}

/// One system message carrying every summary, or `None` for an empty ledger
pub fn summary_message(summaries: &[ConversationSummary]) -> Option<Message> {
    if summaries.is_empty() {
        return None;
    }

    let parts = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Conversation context (part {}): {}", i + 1, s.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    Some(Message::system(format!("{}{}", SUMMARY_HEADER, parts)))
}
