//! colloquy-ai: Chat provider abstraction layer
//!
//! This crate provides the message and usage types shared by every provider,
//! the line-oriented SSE decoder used for streamed completions, and the
//! GigaChat and YandexGPT transports.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::ChatTransport;
pub use stream::{ChatEventStream, SseDecoder, StreamEvent, StreamingSession};
pub use types::*;
