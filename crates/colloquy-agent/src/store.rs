//! Conversation persistence
//!
//! Stores are best-effort: a failed load yields an empty/default value and a
//! failed save is logged. Neither ever interrupts the conversation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use colloquy_ai::Message;
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};

use crate::conversation::{CompressionPolicy, ConversationSummary};
use crate::usage::UsageState;

/// Persistence for everything a session needs to resume
pub trait Store: Send + Sync {
    fn load_messages(&self) -> Vec<Message>;
    fn save_messages(&self, messages: &[Message]);
    fn clear_messages(&self);

    fn load_summaries(&self) -> Vec<ConversationSummary>;
    fn save_summaries(&self, summaries: &[ConversationSummary]);
    fn clear_summaries(&self);

    fn load_usage(&self) -> UsageState;
    fn save_usage(&self, usage: &UsageState);

    fn load_compression_policy(&self) -> CompressionPolicy;
    fn save_compression_policy(&self, policy: CompressionPolicy);
}

/// In-process store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
    summaries: Mutex<Vec<ConversationSummary>>,
    usage: Mutex<UsageState>,
    policy: Mutex<CompressionPolicy>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load_messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    fn save_messages(&self, messages: &[Message]) {
        *self.messages.lock() = messages.to_vec();
    }

    fn clear_messages(&self) {
        self.messages.lock().clear();
    }

    fn load_summaries(&self) -> Vec<ConversationSummary> {
        self.summaries.lock().clone()
    }

    fn save_summaries(&self, summaries: &[ConversationSummary]) {
        *self.summaries.lock() = summaries.to_vec();
    }

    fn clear_summaries(&self) {
        self.summaries.lock().clear();
    }

    fn load_usage(&self) -> UsageState {
        self.usage.lock().clone()
    }

    fn save_usage(&self, usage: &UsageState) {
        *self.usage.lock() = usage.clone();
    }

    fn load_compression_policy(&self) -> CompressionPolicy {
        *self.policy.lock()
    }

    fn save_compression_policy(&self, policy: CompressionPolicy) {
        *self.policy.lock() = policy;
    }
}

const MESSAGES_FILE: &str = "messages.json";
const SUMMARIES_FILE: &str = "summaries.json";
const USAGE_FILE: &str = "usage.json";
const POLICY_FILE: &str = "compression_policy.json";

/// One pretty-printed JSON file per key inside a data directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// The directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location: `<data_dir>/colloquy`
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("colloquy")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.dir.join(name);
        if !path.exists() {
            return T::default();
        }

        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()));

        match parsed {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Failed to load {}: {}", path.display(), e);
                T::default()
            }
        }
    }

    fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) {
        if let Err(e) = self.write(name, value) {
            tracing::warn!("Failed to save {}: {}", self.dir.join(name).display(), e);
        }
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(value)?;
        fs::write(self.dir.join(name), content)
    }

    fn remove(&self, name: &str) {
        let path = self.dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

impl Store for JsonFileStore {
    fn load_messages(&self) -> Vec<Message> {
        self.load(MESSAGES_FILE)
    }

    fn save_messages(&self, messages: &[Message]) {
        self.save(MESSAGES_FILE, messages);
    }

    fn clear_messages(&self) {
        self.remove(MESSAGES_FILE);
    }

    fn load_summaries(&self) -> Vec<ConversationSummary> {
        self.load(SUMMARIES_FILE)
    }

    fn save_summaries(&self, summaries: &[ConversationSummary]) {
        self.save(SUMMARIES_FILE, summaries);
    }

    fn clear_summaries(&self) {
        self.remove(SUMMARIES_FILE);
    }

    fn load_usage(&self) -> UsageState {
        self.load(USAGE_FILE)
    }

    fn save_usage(&self, usage: &UsageState) {
        self.save(USAGE_FILE, usage);
    }

    fn load_compression_policy(&self) -> CompressionPolicy {
        self.load(POLICY_FILE)
    }

    fn save_compression_policy(&self, policy: CompressionPolicy) {
        self.save(POLICY_FILE, &policy);
    }
}
