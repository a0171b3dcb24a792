//! Configuration file support

use colloquy_agent::JsonFileStore;
use colloquy_ai::providers::{gigachat::GigaChatConfig, get_secret, yandex::YandexConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for colloquy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default provider (gigachat, yandex)
    pub provider: Option<String>,
    /// Default model
    pub model: Option<String>,
    /// Compression policy (none, truncate, summarize)
    pub policy: Option<String>,
    /// Inject the strict-format instruction
    pub strict_mode: Option<bool>,
    /// Stream replies when the provider supports it
    pub stream: Option<bool>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Recent messages kept verbatim
    pub context_window: Option<usize>,
    /// Messages folded into one summary
    pub block_size: Option<usize>,
    /// Where conversation state is stored
    pub data_dir: Option<String>,
    #[serde(default)]
    pub gigachat: GigaChatSettings,
    #[serde(default)]
    pub yandex: YandexSettings,
}

/// GigaChat credentials and endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GigaChatSettings {
    /// Base64 `client_id:client_secret`
    pub authorization_key: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub base_url: Option<String>,
    pub auth_url: Option<String>,
}

/// YandexGPT credentials and endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct YandexSettings {
    pub api_key: Option<String>,
    pub folder_id: Option<String>,
    pub base_url: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("colloquy")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for COLLOQUY_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("COLLOQUY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file. Missing or broken files yield the defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to a file
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            provider: Some("gigachat".to_string()),
            model: Some("GigaChat-2".to_string()),
            policy: Some("none".to_string()),
            strict_mode: Some(false),
            stream: Some(true),
            ..Config::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// GigaChat connection settings, or `None` when no credentials are found
    /// in the config file or `GIGACHAT_AUTH_KEY`
    pub fn gigachat_config(&self) -> Option<GigaChatConfig> {
        let settings = &self.gigachat;
        let mut config = match (&settings.client_id, &settings.client_secret) {
            (Some(id), Some(secret)) if settings.authorization_key.is_none() => {
                GigaChatConfig::from_client_credentials(id, secret)
            }
            _ => GigaChatConfig::new(
                get_secret(settings.authorization_key.as_deref(), "GIGACHAT_AUTH_KEY").ok()?,
            ),
        };

        if let Some(scope) = &settings.scope {
            config = config.with_scope(scope);
        }
        if let Some(url) = &settings.base_url {
            config = config.with_base_url(url);
        }
        if let Some(url) = &settings.auth_url {
            config = config.with_auth_url(url);
        }
        Some(config)
    }

    /// YandexGPT connection settings, or `None` when no API key is found in
    /// the config file or `YANDEX_API_KEY`
    pub fn yandex_config(&self) -> Option<YandexConfig> {
        let settings = &self.yandex;
        let api_key = get_secret(settings.api_key.as_deref(), "YANDEX_API_KEY").ok()?;
        let folder_id = get_secret(settings.folder_id.as_deref(), "YANDEX_FOLDER_ID")
            .unwrap_or_default();

        let mut config = YandexConfig::new(api_key, folder_id);
        if let Some(url) = &settings.base_url {
            config = config.with_base_url(url);
        }
        Some(config)
    }

    /// Directory for conversation state
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(JsonFileStore::default_dir)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# colloquy configuration file
# Place at ~/.config/colloquy/config.toml (Linux), ~/Library/Application Support/colloquy/config.toml (Mac)
# or point COLLOQUY_CONFIG_PATH at it

# Default provider (gigachat, yandex)
provider = "gigachat"

# Default model (GigaChat-2, GigaChat-2-Pro, GigaChat-2-Max, or a YandexGPT model such as yandexgpt/rc)
model = "GigaChat-2"

# How history is reduced before sending (none, truncate, summarize)
policy = "none"

# Ask for very short, bulleted answers
strict_mode = false

# Stream replies when the provider supports it
stream = true

# max_tokens = 1024
# temperature = 0.0

# Recent messages always sent verbatim, and messages folded per summary
# context_window = 10
# block_size = 10

# Conversation state directory (defaults to the platform data dir)
# data_dir = "~/.local/share/colloquy"

# Credentials (optional - environment variables GIGACHAT_AUTH_KEY,
# YANDEX_API_KEY and YANDEX_FOLDER_ID work too)
[gigachat]
# authorization_key = "..."
# or
# client_id = "..."
# client_secret = "..."
# scope = "GIGACHAT_API_PERS"

[yandex]
# api_key = "..."
# folder_id = "..."
"#
}
