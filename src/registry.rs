//! Protection rules and the derived set of protected item ids

use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

use crate::types::{ItemId, ProtectionRule};

/// Durable storage for the rule map (fire-and-forget from the registry's view)
pub trait RuleStore {
    fn save_rules(&self, rules: &BTreeMap<ItemId, ProtectionRule>) -> Result<()>;
}

/// Store that keeps nothing, for sessions without a config file
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRuleStore;

impl RuleStore for NullRuleStore {
    fn save_rules(&self, _rules: &BTreeMap<ItemId, ProtectionRule>) -> Result<()> {
        Ok(())
    }
}

pub struct ProtectionRegistry {
    rules: BTreeMap<ItemId, ProtectionRule>,
    /// Always equal to the ids of enabled rules
    protected: HashSet<ItemId>,
    store: Box<dyn RuleStore>,
}

impl std::fmt::Debug for ProtectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionRegistry")
            .field("rules", &self.rules)
            .field("protected", &self.protected)
            .finish_non_exhaustive()
    }
}

impl ProtectionRegistry {
    pub fn new(rules: BTreeMap<ItemId, ProtectionRule>, store: Box<dyn RuleStore>) -> Self {
        let mut registry = Self {
            rules,
            protected: HashSet::new(),
            store,
        };
        registry.rebuild();
        registry
    }

    pub fn in_memory() -> Self {
        Self::new(BTreeMap::new(), Box::new(NullRuleStore))
    }

    /// Insert or replace the rule for `rule.item_id`. The protected set is
    /// consistent before this returns; persistence failures are only logged.
    pub fn set_rule(&mut self, rule: ProtectionRule) {
        info!(item = %rule.item_id, name = %rule.item_name, enabled = rule.enabled, "Setting protection rule");
        self.rules.insert(rule.item_id.clone(), rule);
        self.rebuild();
        self.persist();
    }

    pub fn remove_rule(&mut self, item_id: &ItemId) -> Option<ProtectionRule> {
        let removed = self.rules.remove(item_id);
        if removed.is_some() {
            info!(item = %item_id, "Removed protection rule");
            self.rebuild();
            self.persist();
        }
        removed
    }

    pub fn get_rule(&self, item_id: &ItemId) -> Option<&ProtectionRule> {
        self.rules.get(item_id)
    }

    pub fn is_protected(&self, item_id: &ItemId) -> bool {
        self.protected.contains(item_id)
    }

    pub fn rules(&self) -> &BTreeMap<ItemId, ProtectionRule> {
        &self.rules
    }

    /// Number of enabled rules
    pub fn active_count(&self) -> usize {
        self.protected.len()
    }

    pub fn protected_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.protected.iter()
    }

    fn rebuild(&mut self) {
        self.protected = self
            .rules
            .values()
            .filter(|rule| rule.enabled)
            .map(|rule| rule.item_id.clone())
            .collect();
        debug!(protected = self.protected.len(), total = self.rules.len(), "Rebuilt protected id set");
    }

    fn persist(&self) {
        if let Err(e) = self.store.save_rules(&self.rules) {
            warn!(error = ?e, "Failed to save protection rules, keeping in-memory state");
        }
    }
}
