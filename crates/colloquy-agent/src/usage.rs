//! Per-provider token usage at three scopes.

use std::collections::HashMap;

use colloquy_ai::{Provider, UsageRecord};
use serde::{Deserialize, Serialize};

/// Token usage per provider: the last exchange, the current user session,
/// and the lifetime of the stored state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageState {
    /// Overwritten on every exchange
    #[serde(default)]
    pub last_request: HashMap<Provider, UsageRecord>,
    /// Additive; reset by the user
    #[serde(default)]
    pub session: HashMap<Provider, UsageRecord>,
    /// Additive; only reset by wiping state
    #[serde(default)]
    pub lifetime: HashMap<Provider, UsageRecord>,
}

impl UsageState {
    /// Fold one completed exchange into the totals
    pub fn merge(&mut self, provider: Provider, record: &UsageRecord) {
        self.last_request.insert(provider, *record);
        *self.session.entry(provider).or_default() += record;
        *self.lifetime.entry(provider).or_default() += record;
    }

    /// Zero the session scope for one provider
    pub fn reset_session(&mut self, provider: Provider) {
        self.session.insert(provider, UsageRecord::default());
    }

    pub fn last_request(&self, provider: Provider) -> UsageRecord {
        self.last_request.get(&provider).copied().unwrap_or_default()
    }

    pub fn session(&self, provider: Provider) -> UsageRecord {
        self.session.get(&provider).copied().unwrap_or_default()
    }

    pub fn lifetime(&self, provider: Provider) -> UsageRecord {
        self.lifetime.get(&provider).copied().unwrap_or_default()
    }
}
