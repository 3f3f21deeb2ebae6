//! Player overlay redaction: the on-screen title and the chapter strip of
//! whatever is playing

use anyhow::{Context, Result};
use std::cell::RefCell;
use tracing::{debug, info, warn};

use crate::boundary::{format_episode_label, should_redact_episode, BoundaryCache};
use crate::constants::{host, text};
use crate::detail::redact_chapters;
use crate::engine::SpoilerEngine;
use crate::redaction;
use crate::source::{fields, MediaSource};
use crate::types::{ItemId, ItemKind, MediaItem};

impl<S: MediaSource + 'static> SpoilerEngine<S> {
    /// Now-playing item from the overlay's `data-id` or the location
    fn now_playing(&self) -> Option<ItemId> {
        let from_osd = {
            let doc = self.doc();
            doc.find_by_class(doc.body(), host::OSD_CLASS)
                .and_then(|osd| doc.attr(osd, host::DATA_ID))
                .map(ItemId::from)
        };
        from_osd.or_else(|| self.location_item())
    }

    /// Redact the overlay for the now-playing item. Returns true when
    /// anything was applied.
    pub async fn redact_player_overlay(&self) -> Result<bool> {
        let (enabled, protect_overlay, auto_first_play) = {
            let settings = self.settings.borrow();
            (settings.enabled, settings.protect_overlay, settings.auto_enable_on_first_play)
        };
        if !enabled || self.is_reveal_all_active() {
            return Ok(false);
        }
        let Some(item_id) = self.now_playing() else {
            debug!("No now-playing item");
            return Ok(false);
        };

        // Starting playback is the first-play signal
        if auto_first_play && let Err(e) = self.handle_auto_enable_on_first_play(&item_id).await {
            warn!(item = %item_id, error = ?e, "First-play auto-enable failed");
        }
        if !protect_overlay {
            return Ok(false);
        }

        let item = self
            .source
            .get_item(&item_id, fields::FULL)
            .await
            .with_context(|| format!("Failed to fetch now-playing item {item_id}"))?;
        let Some(title_label) = self.overlay_title_label(&item).await? else {
            return Ok(false);
        };

        let policy = self.settings.borrow().artwork_policy;
        let chapter_word = self.label(text::CHAPTER_KEY, text::CHAPTER_FALLBACK);
        let mut doc = self.doc_mut();
        let Some(osd) = doc.find_by_class(doc.body(), host::OSD_CLASS) else {
            return Ok(false);
        };
        let position = doc
            .attr(osd, host::DATA_POSITION_TICKS)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(item.user_data.playback_position_ticks);

        if let Some(label) = &title_label
            && let Some(title) = doc.find_by_class(osd, host::OSD_TITLE_CLASS)
        {
            redaction::replace_text(&mut doc, title, label);
        }
        let chapters = redact_chapters(&mut doc, osd, position, policy, &chapter_word);
        info!(item = %item.id, chapters, "Player overlay redacted");
        Ok(true)
    }

    /// `None` when the item needs no protection. `Some(None)` protects
    /// chapters only, keeping the title.
    async fn overlay_title_label(&self, item: &MediaItem) -> Result<Option<Option<String>>> {
        if item.user_data.played {
            return Ok(None);
        }
        match item.kind {
            ItemKind::Movie => {
                let protected =
                    self.is_protected(&item.id) || self.protected_collection_for_movie(&item.id).await?.is_some();
                Ok(protected.then_some(None))
            }
            ItemKind::Episode => {
                let Some(series_id) = item.series_id.as_ref() else {
                    return Ok(None);
                };
                if !self.is_protected(series_id) {
                    return Ok(None);
                }
                let Some(position) = item.episode_position() else {
                    return Ok(Some(Some(self.label(text::HIDDEN_TITLE_KEY, text::HIDDEN_TITLE_FALLBACK))));
                };
                let boundary = self.boundary_for(series_id, &RefCell::new(BoundaryCache::new())).await?;
                if should_redact_episode(&position, boundary) {
                    Ok(Some(Some(format_episode_label(&position, self.host.as_ref()))))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }
}
