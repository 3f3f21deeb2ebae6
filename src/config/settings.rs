//! Feature toggles and policy knobs
//!
//! Every field carries a serde default so older config files keep loading
//! as new knobs are added.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use tracing::{error, info, warn};

use crate::constants::{timing, validation};

/// How protected artwork is obscured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtworkPolicy {
    #[default]
    Blur,
    Generic,
    None,
}

impl ArtworkPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "blur" => Some(ArtworkPolicy::Blur),
            "generic" => Some(ArtworkPolicy::Generic),
            "none" => Some(ArtworkPolicy::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub protect_home: bool,
    #[serde(default = "default_true")]
    pub protect_search: bool,
    #[serde(default = "default_true")]
    pub protect_recently_added: bool,
    #[serde(default = "default_true")]
    pub protect_overlay: bool,
    #[serde(default = "default_true")]
    pub protect_calendar: bool,
    #[serde(default = "default_true")]
    pub protect_episode_details: bool,
    #[serde(default)]
    pub artwork_policy: ArtworkPolicy,
    #[serde(default)]
    pub hide_guest_stars: bool,
    /// Reveal window in milliseconds before artwork is hidden again
    #[serde(default = "default_reveal_duration", rename = "revealDuration")]
    pub reveal_duration_ms: u64,
    #[serde(default = "default_true")]
    pub show_buttons: bool,
    #[serde(default = "default_true")]
    pub show_disable_confirmation: bool,
    #[serde(default)]
    pub auto_enable_on_first_play: bool,
    /// Lowercase tag names that auto-enable protection
    #[serde(default)]
    pub tag_auto_enable: BTreeSet<String>,
    /// Redact items whose lookup failed instead of leaving them visible
    #[serde(default)]
    pub fail_closed: bool,
}

fn default_true() -> bool {
    true
}

fn default_reveal_duration() -> u64 {
    timing::DEFAULT_REVEAL_MS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            protect_home: true,
            protect_search: true,
            protect_recently_added: true,
            protect_overlay: true,
            protect_calendar: true,
            protect_episode_details: true,
            artwork_policy: ArtworkPolicy::Blur,
            hide_guest_stars: false,
            reveal_duration_ms: default_reveal_duration(),
            show_buttons: true,
            show_disable_confirmation: true,
            auto_enable_on_first_play: false,
            tag_auto_enable: BTreeSet::new(),
            fail_closed: false,
        }
    }
}

impl Settings {
    /// Validate and clamp values to safe ranges.
    /// Called after loading the file and after env overrides.
    pub fn validate_and_clamp(&mut self) {
        if self.reveal_duration_ms < validation::MIN_REVEAL_MS {
            warn!(reveal_duration_ms = self.reveal_duration_ms, min = validation::MIN_REVEAL_MS, "revealDuration below minimum, clamping");
            self.reveal_duration_ms = validation::MIN_REVEAL_MS;
        } else if self.reveal_duration_ms > validation::MAX_REVEAL_MS {
            warn!(reveal_duration_ms = self.reveal_duration_ms, max = validation::MAX_REVEAL_MS, "revealDuration exceeds maximum, clamping");
            self.reveal_duration_ms = validation::MAX_REVEAL_MS;
        }

        // Tags are matched case-insensitively
        let normalized: BTreeSet<String> = self
            .tag_auto_enable
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();
        if normalized != self.tag_auto_enable {
            info!(tags = ?normalized, "Normalized auto-enable tags");
            self.tag_auto_enable = normalized;
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = env::var("SPOILER_GUARD_ENABLED") {
            match enabled.trim().parse::<bool>() {
                Ok(value) => self.enabled = value,
                Err(e) => error!(var = "SPOILER_GUARD_ENABLED", error = ?e, "failed to parse env var"),
            }
        }
        if let Ok(reveal) = env::var("SPOILER_GUARD_REVEAL_MS") {
            match reveal.trim().parse::<u64>() {
                Ok(value) => self.reveal_duration_ms = value,
                Err(e) => error!(var = "SPOILER_GUARD_REVEAL_MS", error = ?e, "failed to parse env var"),
            }
        }
        if let Ok(policy) = env::var("SPOILER_GUARD_ARTWORK") {
            match ArtworkPolicy::parse(&policy) {
                Some(value) => self.artwork_policy = value,
                None => error!(var = "SPOILER_GUARD_ARTWORK", value = %policy, "unknown artwork policy"),
            }
        }
    }
}
