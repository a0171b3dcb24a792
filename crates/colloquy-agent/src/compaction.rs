//! Rolling summarization of old history
//!
//! Once more than `window_size` messages sit past the compressed-through
//! cursor, the oldest uncompressed block (at most `block_size` messages, never
//! reaching into the most recent window) is sent to the model for a summary.
//! One block per turn; any backlog drains over the following turns.

use std::ops::Range;

use colloquy_ai::{ChatTransport, Message, RequestOptions, UsageRecord};

use crate::compose::DEFAULT_WINDOW_SIZE;
use crate::conversation::ConversationSummary;

/// Configuration for history summarization
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionConfig {
    /// Most recent messages that are never summarized
    pub window_size: usize,
    /// Maximum number of messages folded into one summary
    pub block_size: usize,
    /// Token budget for the summary reply
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            block_size: 10,
            max_tokens: 500,
            temperature: 0.0,
        }
    }
}

/// Result of a successful summarization pass
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub summary: ConversationSummary,
    /// Usage reported for the summarization call itself
    pub usage: UsageRecord,
}

const SUMMARIZATION_PROMPT: &str = "\
You are an assistant that compresses dialogue context. \
Your task is to briefly retell the exchange between the user and the assistant. \
Keep key facts, decisions, names, numbers and important details. \
Leave out greetings, repetitions and filler. \
Answer in a single paragraph of no more than 150 words. \
Write in the same language the conversation was held in.";

/// Whether the uncompressed tail has outgrown the window
pub fn needs_compaction(message_count: usize, compressed_through: usize, window_size: usize) -> bool {
    message_count.saturating_sub(compressed_through) > window_size
}

/// Next span of messages to summarize, or `None` when everything past the
/// cursor still fits in the window.
pub fn select_block(
    message_count: usize,
    compressed_through: usize,
    config: &CompactionConfig,
) -> Option<Range<usize>> {
    let eligible = message_count
        .saturating_sub(compressed_through)
        .saturating_sub(config.window_size);
    let len = eligible.min(config.block_size);
    if len == 0 {
        return None;
    }
    Some(compressed_through..compressed_through + len)
}

/// Summarization instruction followed by the block itself
pub fn build_summarization_request(block: &[Message]) -> Vec<Message> {
    let mut request = Vec::with_capacity(block.len() + 1);
    request.push(Message::system(SUMMARIZATION_PROMPT));
    request.extend_from_slice(block);
    request
}

/// Summarize one block through the transport (blocking call, low budget,
/// zero temperature). An empty reply counts as a failure.
pub async fn summarize_block(
    block: &[Message],
    model: &str,
    config: &CompactionConfig,
    transport: &dyn ChatTransport,
) -> Result<CompactionResult, String> {
    if block.is_empty() {
        return Err("Nothing to summarize".to_string());
    }

    let request = build_summarization_request(block);
    let options = RequestOptions::new(model)
        .with_max_tokens(Some(config.max_tokens))
        .with_temperature(config.temperature);

    let response = transport
        .send(&request, &options)
        .await
        .map_err(|e| format!("Summarization request failed: {}", e))?;

    let text = response.message.content.trim();
    if text.is_empty() {
        return Err("Summarization returned empty response".to_string());
    }

    Ok(CompactionResult {
        summary: ConversationSummary::new(text, block.len()),
        usage: response.usage,
    })
}
