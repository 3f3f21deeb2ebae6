//! Automatic rule creation: on first playback of an untouched item, and for
//! items carrying one of the configured tags
//!
//! Auto-enable only ever adds rules. An existing rule, enabled or not, is
//! the user's decision and is left as is.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::Settings;
use crate::constants::text;
use crate::engine::SpoilerEngine;
use crate::source::{fields, MediaSource};
use crate::types::{ItemId, ItemKind, MediaItem, ProtectionRule, RuleType};

/// Case-insensitive intersection of the item's tags with the configured set
pub fn should_auto_enable_by_tag(item: &MediaItem, settings: &Settings) -> bool {
    if settings.tag_auto_enable.is_empty() {
        return false;
    }
    item.tags
        .iter()
        .any(|tag| settings.tag_auto_enable.contains(&tag.trim().to_lowercase()))
}

impl<S: MediaSource + 'static> SpoilerEngine<S> {
    /// The item a rule for `item` belongs on: the series for episodes and
    /// seasons, the item itself for series, movies and box sets
    async fn protectable_root(&self, item: &MediaItem) -> Result<Option<MediaItem>> {
        match item.kind {
            ItemKind::Series | ItemKind::Movie | ItemKind::BoxSet => Ok(Some(item.clone())),
            ItemKind::Episode | ItemKind::Season => {
                let Some(series_id) = item.series_id.as_ref() else {
                    return Ok(None);
                };
                let series = self
                    .source
                    .get_item(series_id, fields::FULL)
                    .await
                    .with_context(|| format!("Failed to fetch series {series_id}"))?;
                Ok(Some(series))
            }
            ItemKind::Other => Ok(None),
        }
    }

    /// Create an enabled rule for `root` unless one exists. Toasts on success.
    fn auto_enable(&self, root: &MediaItem, reason: &str) -> Option<ProtectionRule> {
        let rule_type = RuleType::from_kind(root.kind)?;
        if self.get_rule(&root.id).is_some() {
            debug!(item = %root.id, "Rule already exists, not auto-enabling");
            return None;
        }
        let rule = ProtectionRule::enabled(root.id.clone(), root.name.clone(), rule_type);
        info!(item = %root.id, name = %root.name, reason, "Auto-enabling protection");
        self.set_rule(rule.clone());
        let prefix = self.label(text::AUTO_ENABLED_KEY, text::AUTO_ENABLED_FALLBACK);
        self.host.toast(&format!("{prefix} {}", root.name));
        Some(rule)
    }

    /// Protect what the user just started watching for the first time
    pub async fn handle_auto_enable_on_first_play(&self, item_id: &ItemId) -> Result<Option<ProtectionRule>> {
        if !self.settings.borrow().auto_enable_on_first_play {
            return Ok(None);
        }
        let item = self
            .source
            .get_item(item_id, fields::FULL)
            .await
            .with_context(|| format!("Failed to fetch played item {item_id}"))?;
        if !item.user_data.is_untouched() {
            return Ok(None);
        }
        let Some(root) = self.protectable_root(&item).await? else {
            return Ok(None);
        };
        Ok(self.auto_enable(&root, "first play"))
    }

    /// Protect items whose root carries one of the configured tags
    pub async fn handle_auto_enable_by_tag(&self, item_id: &ItemId) -> Result<Option<ProtectionRule>> {
        if self.settings.borrow().tag_auto_enable.is_empty() {
            return Ok(None);
        }
        let item = self
            .source
            .get_item(item_id, fields::FULL)
            .await
            .with_context(|| format!("Failed to fetch item {item_id}"))?;
        let Some(root) = self.protectable_root(&item).await? else {
            return Ok(None);
        };
        if !should_auto_enable_by_tag(&root, &self.settings.borrow()) {
            return Ok(None);
        }
        Ok(self.auto_enable(&root, "tag"))
    }
}
