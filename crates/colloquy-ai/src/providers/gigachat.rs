//! GigaChat chat completions provider

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ChatTransport, check_status, get_secret};
use crate::{
    error::{Error, Result},
    stream::{ChatEventStream, decode_byte_stream},
    types::{ChatResponse, GigaChatModel, Message, Provider, RequestOptions, UsageRecord},
};

pub const DEFAULT_BASE_URL: &str = "https://gigachat.devices.sberbank.ru/api/v1";
pub const DEFAULT_AUTH_URL: &str = "https://ngw.devices.sberbank.ru:9443/api/v2/oauth";
pub const DEFAULT_SCOPE: &str = "GIGACHAT_API_PERS";

/// Refresh the access token this long before the server-side expiry
const EXPIRY_MARGIN_MS: i64 = 60 * 1000;

/// Connection settings for GigaChat
#[derive(Debug, Clone)]
pub struct GigaChatConfig {
    /// Base64 `client_id:client_secret`, sent as Basic auth to the token endpoint
    pub authorization_key: String,
    pub scope: String,
    pub base_url: String,
    pub auth_url: String,
}

impl GigaChatConfig {
    pub fn new(authorization_key: impl Into<String>) -> Self {
        Self {
            authorization_key: authorization_key.into(),
            scope: DEFAULT_SCOPE.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
        }
    }

    /// Derive the authorization key from raw client credentials
    pub fn from_client_credentials(client_id: &str, client_secret: &str) -> Self {
        let key = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", client_id, client_secret));
        Self::new(key)
    }

    /// Create from the `GIGACHAT_AUTH_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(get_secret(None, "GIGACHAT_AUTH_KEY")?))
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }
}

/// OAuth access token as returned by the token endpoint
#[derive(Debug, Clone, Deserialize)]
struct AccessToken {
    access_token: String,
    /// Expiry as epoch milliseconds
    expires_at: i64,
}

impl AccessToken {
    fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expires_at - EXPIRY_MARGIN_MS > now_ms
    }
}

/// GigaChat API client
pub struct GigaChatProvider {
    client: reqwest::Client,
    config: GigaChatConfig,
    token: Mutex<Option<AccessToken>>,
}

impl GigaChatProvider {
    pub fn new(config: GigaChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(GigaChatConfig::from_env()?))
    }

    /// Return the cached access token, fetching a new one when it is missing
    /// or about to expire
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token(chrono::Utc::now().timestamp_millis()) {
            return Ok(token);
        }

        let token = self.fetch_token().await?;
        let access = token.access_token.clone();
        *self.token.lock() = Some(token);
        Ok(access)
    }

    fn cached_token(&self, now_ms: i64) -> Option<String> {
        self.token
            .lock()
            .as_ref()
            .filter(|t| t.is_valid_at(now_ms))
            .map(|t| t.access_token.clone())
    }

    /// A rejected token was revoked server-side; the next call fetches a
    /// fresh one
    fn forget_token_on(&self, error: &Error) {
        if error.is_auth_failure() {
            tracing::debug!("Dropping cached GigaChat token: {}", error);
            *self.token.lock() = None;
        }
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        tracing::debug!("Requesting GigaChat access token from {}", self.config.auth_url);

        let response = self
            .client
            .post(&self.config.auth_url)
            .header("Authorization", format!("Basic {}", self.config.authorization_key))
            .header("RqUID", uuid::Uuid::new_v4().to_string())
            .header("Accept", "application/json")
            .form(&[("scope", self.config.scope.as_str())])
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token endpoint returned {}: {}",
                status, text
            )));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::Auth(format!("invalid token response: {}", e)))
    }

    async fn post_completion(&self, request: &GigaChatRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.base_url);
        tracing::debug!("GigaChat API URL: {}", url);

        let token = self.access_token().await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let result = check_status(response).await;
        if let Err(e) = &result {
            self.forget_token_on(e);
        }
        result
    }
}

#[async_trait]
impl ChatTransport for GigaChatProvider {
    fn provider(&self) -> Provider {
        Provider::GigaChat
    }

    async fn send(&self, messages: &[Message], options: &RequestOptions) -> Result<ChatResponse> {
        let request = build_request(messages, options, false);
        let response = self.post_completion(&request).await?;
        let body = response.bytes().await?;
        parse_response(&body)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream(&self, messages: &[Message], options: &RequestOptions) -> Result<ChatEventStream> {
        let request = build_request(messages, options, true);
        let response = self.post_completion(&request).await?;
        Ok(decode_byte_stream(response.bytes_stream()))
    }
}

fn build_request(messages: &[Message], options: &RequestOptions, stream: bool) -> GigaChatRequest {
    GigaChatRequest {
        model: GigaChatModel::parse_lenient(&options.model),
        messages: options.format.apply(messages),
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        repetition_penalty: 1.0,
        update_interval: 0,
        stream,
    }
}

fn parse_response(body: &[u8]) -> Result<ChatResponse> {
    let payload: GigaChatResponse = serde_json::from_slice(body)?;
    let message = payload
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| Error::UnexpectedResponse("no choices in GigaChat response".into()))?;

    Ok(ChatResponse {
        message,
        usage: UsageRecord::new(
            payload.usage.prompt_tokens,
            payload.usage.completion_tokens,
            payload.usage.total_tokens,
        ),
    })
}

// Request/Response types

#[derive(Debug, Serialize)]
struct GigaChatRequest {
    model: GigaChatModel,
    messages: Vec<Message>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    repetition_penalty: f32,
    update_interval: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GigaChatResponse {
    #[serde(default)]
    choices: Vec<GigaChatChoice>,
    #[serde(default)]
    usage: GigaChatUsage,
}

#[derive(Debug, Deserialize)]
struct GigaChatChoice {
    message: Message,
}

#[derive(Debug, Default, Deserialize)]
struct GigaChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
