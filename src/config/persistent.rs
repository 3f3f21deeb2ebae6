//! Persisted configuration: settings plus the protection rule map
//!
//! Stored as pretty JSON under the platform config directory. The rule map
//! is written back whenever a rule changes; settings on disk are preserved
//! across rule saves.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::settings::Settings;
use crate::registry::RuleStore;
use crate::types::{ItemId, ProtectionRule};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    /// Item id → rule, one rule per item
    #[serde(default)]
    pub rules: BTreeMap<ItemId, ProtectionRule>,
}

impl Config {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::config::FILENAME);
        path
    }

    /// Load from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config or fall back to defaults.
    /// A missing file creates a default one; a broken file is reported and
    /// left untouched so the user can fix it.
    pub fn load_from(path: &Path) -> Self {
        let mut config = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), rules = config.rules.len(), "Loaded config");
                    config
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                    error!(path = %path.display(), "The file has been preserved - fix the syntax errors and restart.");
                    Config::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No config file found, generating default");
                let config = Config::default();
                if let Err(e) = config.save_to(path) {
                    error!(error = ?e, "Failed to save default config");
                }
                config
            }
        };

        config.settings.apply_env_overrides();
        config.settings.validate_and_clamp();
        config.drop_mismatched_rules();
        config
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;
        fs::write(path, contents).with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// A hand-edited rule keyed under a different id than it names would
    /// break the one-rule-per-id invariant
    fn drop_mismatched_rules(&mut self) {
        self.rules.retain(|key, rule| {
            let keep = *key == rule.item_id;
            if !keep {
                error!(key = %key, item_id = %rule.item_id, "Dropping rule stored under mismatched key");
            }
            keep
        });
    }
}

/// Writes the rule map into the config file, preserving the settings
/// already on disk
#[derive(Debug, Clone)]
pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl RuleStore for JsonRuleStore {
    fn save_rules(&self, rules: &BTreeMap<ItemId, ProtectionRule>) -> Result<()> {
        let mut config = match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str::<Config>(&contents)
                .with_context(|| format!("Refusing to overwrite unparseable config at {}", self.path.display()))?,
            Err(_) => Config::default(),
        };
        config.rules = rules.clone();
        config.save_to(&self.path)
    }
}
