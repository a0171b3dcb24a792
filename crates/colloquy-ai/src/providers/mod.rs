//! Chat provider implementations

pub mod gigachat;
pub mod yandex;

use crate::{
    ChatEventStream, ChatResponse, Error, Message, Provider, RequestOptions, Result,
};
use async_trait::async_trait;

/// One chat backend. Implementations normalize their wire format into
/// [`ChatResponse`] / [`crate::StreamEvent`] so callers never branch on
/// provider identity.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Which provider this transport talks to
    fn provider(&self) -> Provider;

    /// Blocking, single-shot completion
    async fn send(&self, messages: &[Message], options: &RequestOptions) -> Result<ChatResponse>;

    /// Whether [`ChatTransport::stream`] is available
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Streamed completion
    async fn stream(
        &self,
        _messages: &[Message],
        _options: &RequestOptions,
    ) -> Result<ChatEventStream> {
        Err(Error::StreamingUnsupported(self.provider().name().to_string()))
    }
}

/// Turn a non-2xx response into an API error, passing successful ones through
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(Error::api(status.as_u16(), text))
}

/// Get a secret from the provided value or an environment variable
pub fn get_secret(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(value) = provided.filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }

    std::env::var(env_var)
        .map_err(|_| Error::InvalidConfig(format!("{} is not set", env_var)))
}
