//! colloquy-agent: Conversation runtime with context compression
//!
//! This crate owns the conversation log and decides what part of it is sent
//! on each turn: full history, a truncated window, or rolling summaries of
//! older messages followed by the recent tail.

pub mod compaction;
pub mod compose;
pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod session;
pub mod store;
pub mod usage;

pub use compaction::CompactionConfig;
pub use compose::{ComposeOptions, compose};
pub use conversation::{CompressionPolicy, Conversation, ConversationSummary};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use handle::SessionHandle;
pub use session::{ChatSession, SessionConfig};
pub use store::{JsonFileStore, MemoryStore, Store};
pub use usage::UsageState;
