//! YandexGPT foundation models provider (blocking completions only)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatTransport, check_status, get_secret};
use crate::{
    error::{Error, Result},
    types::{ChatResponse, Message, Provider, RequestOptions, Role, UsageRecord},
};

pub const DEFAULT_BASE_URL: &str = "https://llm.api.cloud.yandex.net/foundationModels/v1";

/// Connection settings for YandexGPT
#[derive(Debug, Clone)]
pub struct YandexConfig {
    pub api_key: String,
    /// Cloud folder the model URI is resolved against
    pub folder_id: String,
    pub base_url: String,
}

impl YandexConfig {
    pub fn new(api_key: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            folder_id: folder_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from `YANDEX_API_KEY` and (optionally) `YANDEX_FOLDER_ID`
    pub fn from_env() -> Result<Self> {
        let api_key = get_secret(None, "YANDEX_API_KEY")?;
        let folder_id = std::env::var("YANDEX_FOLDER_ID").unwrap_or_default();
        Ok(Self::new(api_key, folder_id))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Resolve a model name into a `gpt://` URI. Full URIs pass through.
    pub fn model_uri(&self, model: &str) -> String {
        if model.starts_with("gpt://") {
            return model.to_string();
        }
        let model = if model.is_empty() {
            Provider::Yandex.default_model()
        } else {
            model
        };
        format!("gpt://{}/{}", self.folder_id, model)
    }
}

/// YandexGPT API client
pub struct YandexProvider {
    client: reqwest::Client,
    config: YandexConfig,
}

impl YandexProvider {
    pub fn new(config: YandexConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(YandexConfig::from_env()?))
    }

    fn build_request(&self, messages: &[Message], options: &RequestOptions) -> YandexRequest {
        YandexRequest {
            model_uri: self.config.model_uri(&options.model),
            completion_options: CompletionOptions {
                stream: false,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            },
            messages: options
                .format
                .apply(messages)
                .into_iter()
                .map(|m| YandexMessage {
                    role: m.role,
                    text: m.content,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ChatTransport for YandexProvider {
    fn provider(&self) -> Provider {
        Provider::Yandex
    }

    async fn send(&self, messages: &[Message], options: &RequestOptions) -> Result<ChatResponse> {
        let request = self.build_request(messages, options);
        let url = format!("{}/completion", self.config.base_url);
        tracing::debug!("YandexGPT API URL: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = response.bytes().await?;
        parse_response(&body)
    }
}

fn parse_response(body: &[u8]) -> Result<ChatResponse> {
    let payload: YandexResponse = serde_json::from_slice(body)?;
    let result = payload.result;
    let message = result
        .alternatives
        .into_iter()
        .next()
        .map(|a| Message::new(a.message.role, a.message.text))
        .ok_or_else(|| Error::UnexpectedResponse("no alternatives in YandexGPT response".into()))?;

    let usage = result.usage;
    Ok(ChatResponse {
        message,
        usage: UsageRecord::new(
            usage.input_text_tokens.value(),
            usage.completion_tokens.value(),
            usage.total_tokens.value(),
        ),
    })
}

// Request/Response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct YandexRequest {
    model_uri: String,
    completion_options: CompletionOptions,
    messages: Vec<YandexMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOptions {
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct YandexMessage {
    role: Role,
    text: String,
}

#[derive(Debug, Deserialize)]
struct YandexResponse {
    result: YandexResult,
}

#[derive(Debug, Deserialize)]
struct YandexResult {
    #[serde(default)]
    alternatives: Vec<YandexAlternative>,
    #[serde(default)]
    usage: YandexUsage,
}

#[derive(Debug, Deserialize)]
struct YandexAlternative {
    message: YandexMessage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YandexUsage {
    #[serde(default)]
    input_text_tokens: TokenCount,
    #[serde(default)]
    completion_tokens: TokenCount,
    #[serde(default)]
    total_tokens: TokenCount,
}

/// Yandex reports counts as int64-in-a-string; accept plain numbers too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenCount {
    Number(u64),
    Text(String),
}

impl Default for TokenCount {
    fn default() -> Self {
        TokenCount::Number(0)
    }
}

impl TokenCount {
    fn value(&self) -> u64 {
        match self {
            TokenCount::Number(n) => *n,
            TokenCount::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}
