//! Concurrent ownership and capability registries fed by the connection layer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use super::ports::{CapabilityCheck, OwnershipResolver};

/// Which executor owns an account, and since when
#[derive(Debug, Clone)]
pub struct OwnershipRecord {
    pub agent_id: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Account → executor map.
///
/// Last registration wins when an account moves between executors.
#[derive(Default)]
pub struct AccountRegistry {
    owners: DashMap<String, OwnershipRecord>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_account(&self, agent_id: &str, account_id: &str) {
        let now = Utc::now();
        let mut record = self
            .owners
            .entry(account_id.to_string())
            .or_insert_with(|| OwnershipRecord {
                agent_id: agent_id.to_string(),
                registered_at: now,
                last_seen_at: now,
            });

        if record.agent_id != agent_id {
            warn!(
                account_id,
                previous_agent = %record.agent_id,
                new_agent = agent_id,
                "account ownership moved"
            );
            record.agent_id = agent_id.to_string();
            record.registered_at = now;
        }
        record.last_seen_at = now;

        info!(account_id, agent_id, "account registered");
    }

    pub fn unregister_account(&self, account_id: &str) -> Option<OwnershipRecord> {
        let removed = self.owners.remove(account_id).map(|(_, record)| record);
        if removed.is_none() {
            warn!(account_id, "unregister for unknown account");
        }
        removed
    }

    /// Drop every account owned by a disconnected executor
    pub fn unregister_agent(&self, agent_id: &str) -> usize {
        let before = self.owners.len();
        self.owners.retain(|_, record| record.agent_id != agent_id);
        let removed = before.saturating_sub(self.owners.len());
        info!(agent_id, accounts = removed, "agent accounts unregistered");
        removed
    }

    pub fn accounts_of(&self, agent_id: &str) -> Vec<String> {
        let mut accounts: Vec<String> = self
            .owners
            .iter()
            .filter(|entry| entry.value().agent_id == agent_id)
            .map(|entry| entry.key().clone())
            .collect();
        accounts.sort();
        accounts
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl OwnershipResolver for AccountRegistry {
    fn get_owner(&self, account_id: &str) -> Option<String> {
        self.owners
            .get(account_id)
            .map(|record| record.agent_id.clone())
            .filter(|agent| !agent.is_empty())
    }
}

/// Executor → lossless-delivery support, learned during handshake.
///
/// Executors that never reported are treated as compatibility mode.
#[derive(Default)]
pub struct AgentCapabilities {
    lossless: DashMap<String, bool>,
}

impl AgentCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lossless(&self, agent_id: &str, supported: bool) {
        self.lossless.insert(agent_id.to_string(), supported);
    }

    pub fn remove(&self, agent_id: &str) {
        self.lossless.remove(agent_id);
    }
}

impl CapabilityCheck for AgentCapabilities {
    fn supports_lossless_delivery(&self, agent_id: &str) -> bool {
        self.lossless.get(agent_id).map_or(false, |flag| *flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_registration_wins() {
        let registry = AccountRegistry::new();
        registry.register_account("agent-a", "acct-1");
        registry.register_account("agent-b", "acct-1");

        assert_eq!(registry.get_owner("acct-1").as_deref(), Some("agent-b"));
        assert!(registry.accounts_of("agent-a").is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_agent_drops_all_accounts() {
        let registry = AccountRegistry::new();
        registry.register_account("agent-a", "acct-1");
        registry.register_account("agent-a", "acct-2");
        registry.register_account("agent-b", "acct-3");

        assert_eq!(registry.accounts_of("agent-a"), vec!["acct-1", "acct-2"]);
        assert_eq!(registry.unregister_agent("agent-a"), 2);
        assert_eq!(registry.get_owner("acct-1"), None);
        assert_eq!(registry.get_owner("acct-3").as_deref(), Some("agent-b"));
    }

    #[test]
    fn test_unknown_agent_is_compatibility_mode() {
        let caps = AgentCapabilities::new();
        assert!(!caps.supports_lossless_delivery("agent-a"));

        caps.set_lossless("agent-a", true);
        assert!(caps.supports_lossless_delivery("agent-a"));

        caps.remove("agent-a");
        assert!(!caps.supports_lossless_delivery("agent-a"));
    }
}
