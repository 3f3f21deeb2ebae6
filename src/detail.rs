//! Detail page state machine
//!
//! One detail page is processed at a time. The handler is re-entered by
//! every render burst on the page, so it no-ops while a pass is in flight
//! and once the page's item has been handled. Navigation resets the state
//! and bumps the generation; a pass that started before the reset finds a
//! different generation when it resumes and discards its result.

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

use crate::boundary::{
    compute_boundary, format_episode_label, season_fully_watched, should_redact_episode, BoundaryCache,
};
use crate::card::CardDecision;
use crate::config::ArtworkPolicy;
use crate::constants::{host, marker, text};
use crate::dom::{Document, ElementSpec, NodeId};
use crate::engine::SpoilerEngine;
use crate::redaction;
use crate::source::{fields, MediaSource};
use crate::surface::Surface;
use crate::types::{ItemId, ItemKind, MediaItem, RuleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetailPhase {
    #[default]
    Idle,
    Fetching,
    Applying,
    Done,
}

#[derive(Debug, Default)]
pub struct DetailPageState {
    pub last_processed_item_id: Option<ItemId>,
    /// A pass is in flight
    pub processing: bool,
    /// Season overview is hidden until its watch state is known
    pub overview_pending: bool,
    pub phase: DetailPhase,
    pub generation: u64,
}

impl DetailPageState {
    /// Navigation reset
    pub fn reset(&mut self) {
        self.last_processed_item_id = None;
        self.processing = false;
        self.overview_pending = false;
        self.phase = DetailPhase::Idle;
        self.generation += 1;
    }

    /// Let the current item be processed again without cancelling an
    /// in-flight pass
    pub fn forget_item(&mut self) {
        self.last_processed_item_id = None;
    }
}

/// Redact chapter cards that start after `position_ticks`. Chapters are
/// labelled by their 1-based position in the list.
pub(crate) fn redact_chapters(
    doc: &mut Document,
    scope: NodeId,
    position_ticks: i64,
    policy: ArtworkPolicy,
    chapter_word: &str,
) -> usize {
    let mut redacted = 0;
    for (index, chapter) in doc.find_all_by_class(scope, host::CHAPTER_CARD_CLASS).into_iter().enumerate() {
        let start = doc
            .attr(chapter, host::DATA_POSITION_TICKS)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);
        if start <= position_ticks {
            continue;
        }
        if let Some(name) = doc.find_by_class(chapter, host::CHAPTER_NAME_CLASS) {
            redaction::replace_text(doc, name, &format!("{chapter_word} {}", index + 1));
        }
        if let Some(thumb) = doc.find_by_class(chapter, host::CHAPTER_THUMB_CLASS) {
            redaction::redact_artwork(doc, thumb, policy);
        }
        redacted += 1;
    }
    redacted
}

/// Rows of an episode list (list items or cards) with their item ids
fn episode_rows(doc: &Document, root: NodeId) -> Vec<(NodeId, ItemId)> {
    doc.descendants(root)
        .into_iter()
        .filter(|n| doc.has_class(*n, host::LIST_ITEM_CLASS) || doc.has_class(*n, host::CARD_CLASS))
        .filter_map(|n| doc.attr(n, host::DATA_ID).map(|id| (n, ItemId::from(id))))
        .collect()
}

impl<S: MediaSource + 'static> SpoilerEngine<S> {
    /// Detail root and the item it shows
    fn detail_target(&self) -> Option<(NodeId, ItemId)> {
        let location_item = self.location_item();
        let doc = self.doc();
        let root = doc.find_by_class(doc.body(), host::DETAIL_PAGE_CLASS)?;
        let item_id = location_item.or_else(|| doc.attr(root, host::DATA_ID).map(ItemId::from))?;
        Some((root, item_id))
    }

    /// False once navigation has moved past the pass started at `generation`
    fn detail_pass_current(&self, generation: u64) -> bool {
        self.detail.borrow().generation == generation
    }

    /// Entry point for detail page renders
    pub async fn handle_detail_page_mutation(self: &Rc<Self>) {
        if !self.settings.borrow().enabled || self.is_reveal_all_active() {
            return;
        }
        if self.page_surface() != Surface::Detail {
            return;
        }
        let Some((root, item_id)) = self.detail_target() else {
            return;
        };

        let generation = {
            let mut state = self.detail.borrow_mut();
            if state.processing {
                trace!(item = %item_id, "Detail pass already in flight");
                return;
            }
            if state.last_processed_item_id.as_ref() == Some(&item_id) {
                return;
            }
            state.processing = true;
            state.phase = DetailPhase::Fetching;
            state.generation
        };

        let result = self.process_detail_page(root, &item_id, generation).await;

        let mut state = self.detail.borrow_mut();
        if state.generation != generation {
            debug!(item = %item_id, "Discarding detail pass from before navigation");
            return;
        }
        state.processing = false;
        match result {
            Ok(()) => {
                state.last_processed_item_id = Some(item_id);
                state.phase = DetailPhase::Done;
            }
            Err(e) => {
                state.phase = DetailPhase::Idle;
                warn!(item = %item_id, error = ?e, "Detail page pass failed");
            }
        }
    }

    async fn process_detail_page(self: &Rc<Self>, root: NodeId, item_id: &ItemId, generation: u64) -> Result<()> {
        // A created rule schedules its own page rescan
        let tags_configured = !self.settings.borrow().tag_auto_enable.is_empty();
        if tags_configured && let Err(e) = self.handle_auto_enable_by_tag(item_id).await {
            warn!(item = %item_id, error = ?e, "Tag auto-enable check failed");
        }

        let item = self
            .source
            .get_item(item_id, fields::FULL)
            .await
            .with_context(|| format!("Failed to fetch detail item {item_id}"))?;
        if !self.detail_pass_current(generation) {
            return Ok(());
        }
        self.detail.borrow_mut().phase = DetailPhase::Applying;

        match item.kind {
            ItemKind::Series | ItemKind::Season => {
                self.redact_episode_list(root, &item).await?;
            }
            ItemKind::BoxSet => {
                self.redact_collection_page(root, &item).await?;
            }
            ItemKind::Movie => {
                self.redact_movie_detail_page(root, &item).await?;
            }
            ItemKind::Episode => {
                self.redact_episode_detail_page(root, &item).await?;
            }
            ItemKind::Other => {}
        }
        if !self.detail_pass_current(generation) {
            return Ok(());
        }

        self.inject_toggle_button(root, &item);
        let mut doc = self.doc_mut();
        if doc.exists(root) {
            doc.set_attr(root, marker::DETAIL_ATTR, item_id.as_str());
        }
        Ok(())
    }

    /// Series and season pages: redact episode rows past the boundary. A
    /// season page also hides its overview unless the season is fully
    /// watched. Returns the number of rows redacted.
    pub async fn redact_episode_list(&self, root: NodeId, item: &MediaItem) -> Result<usize> {
        let (series_id, season) = match item.kind {
            ItemKind::Series => (item.id.clone(), None),
            ItemKind::Season => match &item.series_id {
                Some(series_id) => (series_id.clone(), item.index_number),
                None => return Ok(0),
            },
            _ => return Ok(0),
        };
        if !self.is_protected(&series_id) {
            return Ok(0);
        }
        let generation = self.detail.borrow().generation;

        let overview = self.doc().find_by_class(root, host::OVERVIEW_CLASS);
        if let (Some(_), Some(overview)) = (season, overview) {
            self.detail.borrow_mut().overview_pending = true;
            redaction::hide_block(&mut self.doc_mut(), overview);
        }

        let episodes = self.source.episodes(&series_id).await;
        if !self.detail_pass_current(generation) {
            debug!(series = %series_id, "Episode list superseded by navigation");
            return Ok(0);
        }
        let episodes = match episodes {
            Ok(episodes) => episodes,
            Err(e) => {
                self.detail.borrow_mut().overview_pending = false;
                if let Some(overview) = overview
                    && !self.settings.borrow().fail_closed
                {
                    redaction::clear(&mut self.doc_mut(), overview);
                }
                return Err(e).with_context(|| format!("Failed to list episodes of series {series_id}"));
            }
        };
        let watches: Vec<_> = episodes.iter().filter_map(MediaItem::episode_watch).collect();
        let boundary = compute_boundary(&watches);

        if let (Some(season), Some(overview)) = (season, overview) {
            let fully_watched = season_fully_watched(&watches, season);
            if fully_watched {
                redaction::clear(&mut self.doc_mut(), overview);
            }
            self.detail.borrow_mut().overview_pending = false;
            debug!(season, fully_watched, "Season overview check");
        }

        let by_id: HashMap<&ItemId, &MediaItem> = episodes.iter().map(|ep| (&ep.id, ep)).collect();
        let rows = episode_rows(&self.doc(), root);
        let mut redacted = 0;
        for (row, id) in rows {
            let Some(episode) = by_id.get(&id) else {
                continue;
            };
            let decision = match episode.episode_position() {
                Some(position) if !episode.user_data.played && should_redact_episode(&position, boundary) => {
                    CardDecision::Redact {
                        label: Some(format_episode_label(&position, self.host.as_ref())),
                        past_boundary: true,
                    }
                }
                _ => CardDecision::Clear,
            };
            if decision != CardDecision::Clear {
                redacted += 1;
            }
            self.apply_card_decision(row, &decision);
            self.doc_mut().set_attr(row, marker::STATE_ATTR, marker::STATE_SCANNED);
        }
        info!(series = %series_id, boundary = ?boundary, redacted, "Episode list processed");
        Ok(redacted)
    }

    /// Box set page: unwatched member movies are redacted while the box set
    /// is protected. Returns the number of cards redacted.
    pub async fn redact_collection_page(&self, root: NodeId, boxset: &MediaItem) -> Result<usize> {
        if !self.is_protected(&boxset.id) {
            return Ok(0);
        }
        let generation = self.detail.borrow().generation;
        let rows = episode_rows(&self.doc(), root);
        let mut redacted = 0;
        for (card, id) in rows {
            let member = self.source.get_item(&id, fields::WATCH).await;
            if !self.detail_pass_current(generation) {
                debug!(boxset = %boxset.id, "Collection page superseded by navigation");
                return Ok(redacted);
            }
            let decision = match member {
                Ok(member) if member.kind == ItemKind::Movie && !member.user_data.played => {
                    CardDecision::Redact {
                        label: None,
                        past_boundary: false,
                    }
                }
                Ok(_) => CardDecision::Clear,
                Err(e) => {
                    warn!(item = %id, error = ?e, "Collection member lookup failed");
                    self.fallback_decision()
                }
            };
            if decision != CardDecision::Clear {
                redacted += 1;
            }
            self.apply_card_decision(card, &decision);
            self.doc_mut().set_attr(card, marker::STATE_ATTR, marker::STATE_SCANNED);
        }
        info!(boxset = %boxset.id, redacted, "Collection page processed");
        Ok(redacted)
    }

    /// Movie page: overview, artwork and upcoming chapters of an unwatched
    /// movie that is protected directly or through a box set
    pub async fn redact_movie_detail_page(&self, root: NodeId, movie: &MediaItem) -> Result<bool> {
        if movie.user_data.played {
            return Ok(false);
        }
        let generation = self.detail.borrow().generation;
        let protected = self.is_protected(&movie.id) || self.protected_collection_for_movie(&movie.id).await?.is_some();
        if !protected || !self.detail_pass_current(generation) {
            return Ok(false);
        }

        let policy = self.settings.borrow().artwork_policy;
        let chapter_word = self.label(text::CHAPTER_KEY, text::CHAPTER_FALLBACK);
        let mut doc = self.doc_mut();
        if !doc.exists(root) {
            return Ok(false);
        }
        if let Some(overview) = doc.find_by_class(root, host::OVERVIEW_CLASS) {
            redaction::hide_block(&mut doc, overview);
        }
        redact_page_artwork(&mut doc, root, policy);
        let chapters = redact_chapters(&mut doc, root, movie.user_data.playback_position_ticks, policy, &chapter_word);
        info!(movie = %movie.id, chapters, "Movie page redacted");
        Ok(true)
    }

    /// Episode page past the boundary: title, overview, artwork, metadata,
    /// optionally guest stars, and upcoming chapters
    pub async fn redact_episode_detail_page(&self, root: NodeId, episode: &MediaItem) -> Result<bool> {
        let (protect_details, hide_guest_stars, policy) = {
            let settings = self.settings.borrow();
            (settings.protect_episode_details, settings.hide_guest_stars, settings.artwork_policy)
        };
        if !protect_details {
            return Ok(false);
        }
        let Some(series_id) = episode.series_id.as_ref() else {
            return Ok(false);
        };
        if !self.is_protected(series_id) || episode.user_data.played {
            return Ok(false);
        }

        let generation = self.detail.borrow().generation;
        let position = episode.episode_position();
        let label = match position {
            Some(position) => {
                let boundary = self.boundary_for(series_id, &RefCell::new(BoundaryCache::new())).await?;
                if !self.detail_pass_current(generation) {
                    debug!(episode = %episode.id, "Episode page superseded by navigation");
                    return Ok(false);
                }
                if !should_redact_episode(&position, boundary) {
                    return Ok(false);
                }
                format_episode_label(&position, self.host.as_ref())
            }
            None => self.label(text::HIDDEN_TITLE_KEY, text::HIDDEN_TITLE_FALLBACK),
        };

        let chapter_word = self.label(text::CHAPTER_KEY, text::CHAPTER_FALLBACK);
        let mut doc = self.doc_mut();
        if !doc.exists(root) {
            return Ok(false);
        }
        if let Some(title) = doc.find_by_class(root, host::ITEM_NAME_CLASS) {
            redaction::replace_text(&mut doc, title, &label);
        }
        let mut blocks = vec![host::OVERVIEW_CLASS, host::MISC_INFO_CLASS];
        if hide_guest_stars {
            blocks.push(host::GUEST_STARS_CLASS);
        }
        for class in blocks {
            for node in doc.find_all_by_class(root, class) {
                redaction::hide_block(&mut doc, node);
            }
        }
        redact_page_artwork(&mut doc, root, policy);
        let chapters = redact_chapters(&mut doc, root, episode.user_data.playback_position_ticks, policy, &chapter_word);
        info!(episode = %episode.id, label = %label, chapters, "Episode page redacted");
        Ok(true)
    }

    /// Protection toggle on series, movie and box set pages
    fn inject_toggle_button(&self, root: NodeId, item: &MediaItem) {
        if !self.settings.borrow().show_buttons || RuleType::from_kind(item.kind).is_none() {
            return;
        }
        let label = if self.is_protected(&item.id) {
            self.label(text::TOGGLE_ON_KEY, text::TOGGLE_ON_FALLBACK)
        } else {
            self.label(text::TOGGLE_OFF_KEY, text::TOGGLE_OFF_FALLBACK)
        };
        let mut doc = self.doc_mut();
        if !doc.exists(root) {
            return;
        }
        match doc.find_by_class(root, marker::TOGGLE_BUTTON_CLASS) {
            Some(button) => doc.set_text(button, &label),
            None => {
                let button = ElementSpec::new("button")
                    .class(marker::TOGGLE_BUTTON_CLASS)
                    .attr(host::DATA_ID, item.id.as_str())
                    .text(&label);
                doc.insert(root, &button);
            }
        }
    }
}

fn redact_page_artwork(doc: &mut Document, root: NodeId, policy: ArtworkPolicy) {
    for class in [host::BACKDROP_CLASS, host::POSTER_CLASS] {
        for node in doc.find_all_by_class(root, class) {
            redaction::redact_artwork(doc, node, policy);
        }
    }
}
