//! Core types for chat interactions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

/// Supported chat providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GigaChat,
    Yandex,
}

impl Provider {
    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::GigaChat => "GigaChat",
            Provider::Yandex => "YandexGPT",
        }
    }

    /// Stable identifier used in config files and commands
    pub fn id(&self) -> &'static str {
        match self {
            Provider::GigaChat => "gigachat",
            Provider::Yandex => "yandex",
        }
    }

    /// Model used when nothing else is configured
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::GigaChat => GigaChatModel::default().id(),
            Provider::Yandex => "yandexgpt/rc",
        }
    }

    /// All supported providers
    pub fn all() -> [Provider; 2] {
        [Provider::GigaChat, Provider::Yandex]
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gigachat" | "giga" => Ok(Provider::GigaChat),
            "yandex" | "yandexgpt" | "ya" => Ok(Provider::Yandex),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// GigaChat model identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GigaChatModel {
    #[default]
    #[serde(rename = "GigaChat-2")]
    Chat2,
    #[serde(rename = "GigaChat-2-Pro")]
    Chat2Pro,
    #[serde(rename = "GigaChat-2-Max")]
    Chat2Max,
}

impl GigaChatModel {
    /// Wire identifier of the model
    pub fn id(&self) -> &'static str {
        match self {
            GigaChatModel::Chat2 => "GigaChat-2",
            GigaChatModel::Chat2Pro => "GigaChat-2-Pro",
            GigaChatModel::Chat2Max => "GigaChat-2-Max",
        }
    }

    pub fn all() -> [GigaChatModel; 3] {
        [
            GigaChatModel::Chat2,
            GigaChatModel::Chat2Pro,
            GigaChatModel::Chat2Max,
        ]
    }

    /// Parse a model identifier, case-insensitively. Unknown identifiers fall
    /// back to the base model.
    pub fn parse_lenient(s: &str) -> Self {
        Self::all()
            .into_iter()
            .find(|m| m.id().eq_ignore_ascii_case(s.trim()))
            .unwrap_or_default()
    }
}

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }

    /// Roles a provider accepts as the first message of a context
    pub fn can_open_context(&self) -> bool {
        matches!(self, Role::User | Role::System)
    }
}

/// A single role-tagged conversation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Token usage reported for one completed exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageRecord {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign<&UsageRecord> for UsageRecord {
    fn add_assign(&mut self, rhs: &UsageRecord) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// Requested shape of the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// System instruction prepended for [`ResponseFormat::Json`] requests.
pub const JSON_FORMAT_INSTRUCTION: &str = "You may only answer with valid JSON of the form \
{\n \"role\": \"[system, user, assistant, function]\",\n \"content\": \"...\"\n}";

impl ResponseFormat {
    /// Apply the format to an outgoing message list. A JSON instruction is
    /// only added when the context does not already open with a system message.
    pub fn apply(&self, messages: &[Message]) -> Vec<Message> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if *self == ResponseFormat::Json
            && messages.first().map(|m| m.role) != Some(Role::System)
        {
            out.push(Message::system(JSON_FORMAT_INSTRUCTION));
        }
        out.extend(messages.iter().cloned());
        out
    }
}

/// Options for a single transport call
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Model identifier understood by the provider
    pub model: String,
    /// Maximum tokens to generate (provider default when unset)
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: f32,
    /// Reply format
    pub format: ResponseFormat,
}

impl RequestOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            temperature: 0.0,
            format: ResponseFormat::Text,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Provider-independent result of a blocking call
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: UsageRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = Message::assistant("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_gigachat_model_ids_are_distinct() {
        let pro: GigaChatModel = serde_json::from_str("\"GigaChat-2-Pro\"").unwrap();
        let max: GigaChatModel = serde_json::from_str("\"GigaChat-2-Max\"").unwrap();
        assert_eq!(pro, GigaChatModel::Chat2Pro);
        assert_eq!(max, GigaChatModel::Chat2Max);
    }

    #[test]
    fn test_gigachat_model_lenient_parse() {
        assert_eq!(GigaChatModel::parse_lenient("gigachat-2-max"), GigaChatModel::Chat2Max);
        assert_eq!(GigaChatModel::parse_lenient("GigaChat-2-Pro"), GigaChatModel::Chat2Pro);
        assert_eq!(GigaChatModel::parse_lenient("something-else"), GigaChatModel::Chat2);
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("GigaChat".parse::<Provider>(), Ok(Provider::GigaChat));
        assert_eq!("yandex".parse::<Provider>(), Ok(Provider::Yandex));
        assert!("openai".parse::<Provider>().is_err());
    }

    #[test]
    fn test_usage_add_assign() {
        let mut total = UsageRecord::new(10, 5, 15);
        total += &UsageRecord::new(8, 3, 11);
        assert_eq!(total, UsageRecord::new(18, 8, 26));
    }

    #[test]
    fn test_json_format_prepends_instruction() {
        let messages = vec![Message::user("hello")];
        let out = ResponseFormat::Json.apply(&messages);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[0].content, JSON_FORMAT_INSTRUCTION);
    }

    #[test]
    fn test_json_format_keeps_existing_system() {
        let messages = vec![Message::system("be brief"), Message::user("hello")];
        let out = ResponseFormat::Json.apply(&messages);
        assert_eq!(out, messages);
    }

    #[test]
    fn test_text_format_is_identity() {
        let messages = vec![Message::assistant("a"), Message::user("b")];
        assert_eq!(ResponseFormat::Text.apply(&messages), messages);
    }
}
