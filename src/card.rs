//! Card processor: decide and apply redaction for cards and list rows
//!
//! Decisions are made per item id, not per element. The first element for
//! an id owns the lookup; elements for the same id arriving while it is in
//! flight wait on it and receive the same decision.

use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::boundary::{format_episode_label, should_redact_episode, should_redact_season, BoundaryCache};
use crate::constants::{host, marker, text};
use crate::dom::NodeId;
use crate::engine::SpoilerEngine;
use crate::redaction;
use crate::source::{fields, MediaSource};
use crate::surface::{card_surface, should_protect_surface, Surface};
use crate::types::{ItemId, ItemKind, MediaItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardDecision {
    /// Obscure artwork, and replace the title with `label` when given
    Redact { label: Option<String>, past_boundary: bool },
    Clear,
}

impl CardDecision {
    fn protected() -> Self {
        CardDecision::Redact {
            label: None,
            past_boundary: false,
        }
    }
}

#[derive(Debug)]
enum CardEntry {
    Processing { waiters: Vec<NodeId> },
    Done(CardDecision),
}

pub(crate) enum Claim {
    /// Caller performs the lookup
    Owner,
    /// Lookup already in flight; the owner applies to this element too
    Joined,
    Done(CardDecision),
}

/// Per-item decision table. Reset on navigation and on rule or settings
/// changes; a reset bumps the generation so in-flight lookups started
/// before it are discarded.
#[derive(Debug, Default)]
pub struct CardTable {
    entries: HashMap<ItemId, CardEntry>,
    generation: u64,
}

impl CardTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn decision(&self, item_id: &ItemId) -> Option<&CardDecision> {
        match self.entries.get(item_id) {
            Some(CardEntry::Done(decision)) => Some(decision),
            _ => None,
        }
    }

    pub(crate) fn claim(&mut self, item_id: &ItemId, card: NodeId) -> Claim {
        match self.entries.get_mut(item_id) {
            Some(CardEntry::Done(decision)) => Claim::Done(decision.clone()),
            Some(CardEntry::Processing { waiters }) => {
                waiters.push(card);
                Claim::Joined
            }
            None => {
                self.entries
                    .insert(item_id.clone(), CardEntry::Processing { waiters: Vec::new() });
                Claim::Owner
            }
        }
    }

    /// Store the decision and hand back the waiters. `None` when the table
    /// was reset since `generation`.
    pub(crate) fn finish(&mut self, item_id: &ItemId, generation: u64, decision: CardDecision) -> Option<Vec<NodeId>> {
        if generation != self.generation {
            return None;
        }
        match self.entries.insert(item_id.clone(), CardEntry::Done(decision)) {
            Some(CardEntry::Processing { waiters }) => Some(waiters),
            _ => Some(Vec::new()),
        }
    }

    /// Drop a failed lookup without caching a decision, so a later pass
    /// retries it
    pub(crate) fn abandon(&mut self, item_id: &ItemId, generation: u64) -> Option<Vec<NodeId>> {
        if generation != self.generation {
            return None;
        }
        match self.entries.remove(item_id) {
            Some(CardEntry::Processing { waiters }) => Some(waiters),
            _ => Some(Vec::new()),
        }
    }
}

/// What the element itself tells us before any lookup
struct CardTarget {
    item_id: ItemId,
    kind: ItemKind,
    series_id: Option<ItemId>,
    surface: Surface,
}

impl<S: MediaSource + 'static> SpoilerEngine<S> {
    /// Decide and apply redaction for one card
    pub async fn process_card(&self, card: NodeId) {
        let pass = RefCell::new(BoundaryCache::new());
        self.process_card_in(card, &pass).await;
    }

    pub(crate) async fn process_card_in(&self, card: NodeId, pass: &RefCell<BoundaryCache>) {
        if !self.settings.borrow().enabled || self.is_reveal_all_active() {
            return;
        }
        let Some(target) = self.claim_element(card) else {
            return;
        };

        if !should_protect_surface(target.surface, &self.settings.borrow()) {
            trace!(item = %target.item_id, surface = %target.surface, "Surface not protected");
            self.mark_scanned(card);
            return;
        }

        let generation = self.cards.borrow().generation();
        let claim = self.cards.borrow_mut().claim(&target.item_id, card);
        match claim {
            Claim::Done(decision) => {
                self.apply_card_decision(card, &decision);
                self.mark_scanned(card);
                return;
            }
            Claim::Joined => {
                trace!(item = %target.item_id, "Joined in-flight lookup");
                return;
            }
            Claim::Owner => {}
        }

        let (decision, waiters) = match self.decide_card(&target, pass).await {
            Ok(decision) => {
                let waiters = self.cards.borrow_mut().finish(&target.item_id, generation, decision.clone());
                (decision, waiters)
            }
            Err(e) => {
                warn!(item = %target.item_id, error = ?e, "Card lookup failed");
                let waiters = self.cards.borrow_mut().abandon(&target.item_id, generation);
                (self.fallback_decision(), waiters)
            }
        };
        let Some(waiters) = waiters else {
            debug!(item = %target.item_id, "Discarding card decision from before reset");
            return;
        };

        for node in std::iter::once(card).chain(waiters) {
            self.apply_card_decision(node, &decision);
            self.mark_scanned(node);
        }
    }

    /// Read the element's attributes and mark it processed. `None` when it
    /// is gone, already marked, or carries no item id.
    fn claim_element(&self, card: NodeId) -> Option<CardTarget> {
        let page = self.page_surface();
        let mut doc = self.doc_mut();
        if !doc.exists(card) || doc.attr(card, marker::STATE_ATTR).is_some() {
            return None;
        }
        let item_id = ItemId::from(doc.attr(card, host::DATA_ID)?);
        doc.set_attr(card, marker::STATE_ATTR, marker::STATE_PROCESSED);

        let surface = card_surface(&doc, card, page, &mut self.surfaces.borrow_mut());
        Some(CardTarget {
            item_id,
            kind: doc.attr(card, host::DATA_TYPE).map(ItemKind::from_attr).unwrap_or_default(),
            series_id: doc.attr(card, host::DATA_SERIES_ID).map(ItemId::from),
            surface,
        })
    }

    fn mark_scanned(&self, card: NodeId) {
        let mut doc = self.doc_mut();
        if doc.exists(card) {
            doc.set_attr(card, marker::STATE_ATTR, marker::STATE_SCANNED);
        }
    }

    pub(crate) fn fallback_decision(&self) -> CardDecision {
        if self.settings.borrow().fail_closed {
            CardDecision::protected()
        } else {
            CardDecision::Clear
        }
    }

    fn protection_decision(&self, item_id: &ItemId) -> CardDecision {
        if self.is_protected(item_id) {
            CardDecision::protected()
        } else {
            CardDecision::Clear
        }
    }

    async fn decide_card(&self, target: &CardTarget, pass: &RefCell<BoundaryCache>) -> Result<CardDecision> {
        if self.registry.borrow().active_count() == 0 {
            return Ok(CardDecision::Clear);
        }
        // Skip the lookup when the element already answers the question
        match target.kind {
            ItemKind::Series | ItemKind::BoxSet => return Ok(self.protection_decision(&target.item_id)),
            ItemKind::Episode | ItemKind::Season => {
                if let Some(series_id) = &target.series_id
                    && !self.is_protected(series_id)
                {
                    return Ok(CardDecision::Clear);
                }
            }
            _ => {}
        }

        let item = self
            .source
            .get_item(&target.item_id, fields::FULL)
            .await
            .with_context(|| format!("Failed to fetch item {}", target.item_id))?;
        self.decide_item(&item, pass).await
    }

    /// Redaction decision for a fetched item
    pub(crate) async fn decide_item(&self, item: &MediaItem, pass: &RefCell<BoundaryCache>) -> Result<CardDecision> {
        let decision = match item.kind {
            ItemKind::Movie => {
                if item.user_data.played {
                    CardDecision::Clear
                } else if self.is_protected(&item.id)
                    || self.protected_collection_for_movie(&item.id).await?.is_some()
                {
                    CardDecision::protected()
                } else {
                    CardDecision::Clear
                }
            }
            ItemKind::Series | ItemKind::BoxSet => self.protection_decision(&item.id),
            ItemKind::Episode => {
                let Some(series_id) = item.series_id.as_ref() else {
                    return Ok(CardDecision::Clear);
                };
                if !self.is_protected(series_id) || item.user_data.played {
                    return Ok(CardDecision::Clear);
                }
                let Some(position) = item.episode_position() else {
                    return Ok(CardDecision::Redact {
                        label: Some(self.label(text::HIDDEN_TITLE_KEY, text::HIDDEN_TITLE_FALLBACK)),
                        past_boundary: false,
                    });
                };
                let boundary = self.boundary_for(series_id, pass).await?;
                if should_redact_episode(&position, boundary) {
                    CardDecision::Redact {
                        label: Some(format_episode_label(&position, self.host.as_ref())),
                        past_boundary: true,
                    }
                } else {
                    CardDecision::Clear
                }
            }
            ItemKind::Season => {
                let (Some(series_id), Some(season)) = (item.series_id.as_ref(), item.index_number) else {
                    return Ok(CardDecision::Clear);
                };
                if !self.is_protected(series_id) {
                    return Ok(CardDecision::Clear);
                }
                let boundary = self.boundary_for(series_id, pass).await?;
                if should_redact_season(season, boundary) {
                    CardDecision::Redact {
                        label: None,
                        past_boundary: true,
                    }
                } else {
                    CardDecision::Clear
                }
            }
            ItemKind::Other => match &item.series_id {
                Some(series_id) => self.protection_decision(series_id),
                None => CardDecision::Clear,
            },
        };
        Ok(decision)
    }

    pub(crate) fn apply_card_decision(&self, card: NodeId, decision: &CardDecision) {
        let policy = self.settings.borrow().artwork_policy;
        let mut doc = self.doc_mut();
        if !doc.exists(card) {
            return;
        }
        match decision {
            CardDecision::Redact { label, past_boundary } => {
                redaction::redact_card(&mut doc, card, policy, label.as_deref());
                if *past_boundary {
                    doc.set_attr(card, marker::PAST_BOUNDARY_ATTR, "true");
                }
                if self.is_reveal_all_active() {
                    redaction::reveal(&mut doc, card);
                }
            }
            CardDecision::Clear => {
                redaction::clear(&mut doc, card);
                doc.remove_attr(card, marker::PAST_BOUNDARY_ATTR);
            }
        }
    }

    /// Cards and list rows not yet visited
    fn unmarked_cards(&self) -> Vec<NodeId> {
        let doc = self.doc();
        doc.descendants(doc.body())
            .into_iter()
            .filter(|n| doc.has_class(*n, host::CARD_CLASS) || doc.has_class(*n, host::LIST_ITEM_CLASS))
            .filter(|n| doc.attr(*n, host::DATA_ID).is_some() && doc.attr(*n, marker::STATE_ATTR).is_none())
            .collect()
    }

    /// Process every unmarked card on the page. Lookups run concurrently and
    /// share one boundary cache. Returns the number of cards visited.
    pub async fn filter_new_cards(self: &Rc<Self>) -> usize {
        if !self.settings.borrow().enabled || self.is_reveal_all_active() {
            return 0;
        }
        let cards = self.unmarked_cards();
        if cards.is_empty() {
            return 0;
        }

        let pass = Rc::new(RefCell::new(BoundaryCache::new()));
        let mut tasks = JoinSet::new();
        for card in cards.iter().copied() {
            let engine = Rc::clone(self);
            let pass = Rc::clone(&pass);
            tasks.spawn_local(async move {
                engine.process_card_in(card, &pass).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = ?e, "Card task failed");
            }
        }
        debug!(cards = cards.len(), "Card pass complete");
        cards.len()
    }

    /// Forget every decision and marker, then rescan the whole page
    pub async fn filter_all_cards(self: &Rc<Self>) -> usize {
        self.reset_card_state();
        self.filter_new_cards().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::engine::testing::*;
    use crate::source::fixtures::*;
    use crate::source::JsonLibrary;
    use crate::types::{ProtectionRule, RuleType};
    use std::time::Duration;
    use tokio::task::LocalSet;

    fn state(h: &Harness, card: NodeId) -> Option<String> {
        let doc = h.engine.document();
        let doc = doc.borrow();
        doc.attr(card, marker::STATE_ATTR).map(str::to_string)
    }

    #[tokio::test]
    async fn test_process_card_twice_redacts_once() {
        let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
        h.engine.set_location("#/home");
        let card = h.insert(&card("e13", "Episode", Some("show")));

        h.engine.process_card(card).await;
        h.engine.process_card(card).await;

        assert_eq!(blurred(&h, card), 1);
        assert_eq!(h.fetches(), 1);
        assert_eq!(title_text(&h, card), "S1E3");
        assert_eq!(state(&h, card).as_deref(), Some(marker::STATE_SCANNED));
        let doc = h.engine.document();
        assert_eq!(doc.borrow().attr(card, marker::PAST_BOUNDARY_ATTR), Some("true"));
    }

    #[tokio::test]
    async fn test_watched_episodes_stay_visible() {
        let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
        h.engine.set_location("#/home");
        let before = h.insert(&card("e12", "Episode", Some("show")));
        // Played, but past the gap at S1E3
        let after_gap = h.insert(&card("e14", "Episode", Some("show")));

        h.engine.process_card(before).await;
        h.engine.process_card(after_gap).await;

        assert_eq!(blurred(&h, before), 0);
        assert_eq!(blurred(&h, after_gap), 0);
        assert_eq!(title_text(&h, after_gap), "Secret title e14");
        assert_eq!(state(&h, after_gap).as_deref(), Some(marker::STATE_SCANNED));
    }

    #[tokio::test]
    async fn test_unprotected_series_needs_no_lookup() {
        let mut library = gap_library();
        library.add_item(series("other", "Other Show"));
        library.add_item(episode("o11", "other", 1, 1, false));
        let h = Harness::new(library, Settings::default(), vec![series_rule("show")]);
        h.engine.set_location("#/home");

        let card = h.insert(&card("o11", "Episode", Some("other")));
        h.engine.process_card(card).await;
        assert_eq!(blurred(&h, card), 0);
        assert_eq!(h.fetches(), 0);
    }

    #[tokio::test]
    async fn test_card_without_id_is_ignored() {
        let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
        let card = h.insert(&crate::dom::ElementSpec::new("div").class(host::CARD_CLASS));
        h.engine.process_card(card).await;
        assert_eq!(state(&h, card), None);
    }

    #[tokio::test]
    async fn test_surface_gating() {
        let settings = Settings {
            protect_search: false,
            protect_home: true,
            ..Settings::default()
        };
        let h = Harness::new(gap_library(), settings, vec![series_rule("show")]);
        h.engine.set_location("#/search.html?query=show");
        let results = h.insert(&section("Search Results", vec![card("e13", "Episode", Some("show"))]));
        let next_up = h.insert(&section("Next Up", vec![card("e21", "Episode", Some("show"))]));

        let search_card = h.engine.document().borrow().find_by_class(results, host::CARD_CLASS).unwrap();
        let home_card = h.engine.document().borrow().find_by_class(next_up, host::CARD_CLASS).unwrap();
        h.engine.process_card(search_card).await;
        h.engine.process_card(home_card).await;

        assert_eq!(blurred(&h, search_card), 0);
        assert_eq!(state(&h, search_card).as_deref(), Some(marker::STATE_SCANNED));
        assert_eq!(blurred(&h, home_card), 1);
    }

    #[tokio::test]
    async fn test_movie_in_protected_boxset() {
        let mut library = JsonLibrary::new();
        library.add_item(boxset("saga", "The Saga"));
        library.add_item(movie("m1", "Part One", true));
        library.add_item(movie("m2", "Part Two", false));
        library.add_to_collection(ItemId::from("saga"), ItemId::from("m1"));
        library.add_to_collection(ItemId::from("saga"), ItemId::from("m2"));
        let rule = ProtectionRule::enabled(ItemId::from("saga"), "The Saga", RuleType::BoxSet);
        let h = Harness::new(library, Settings::default(), vec![rule]);
        h.engine.set_location("#/movies.html");

        let watched = h.insert(&card("m1", "Movie", None));
        let unwatched = h.insert(&card("m2", "Movie", None));
        let boxset = h.insert(&card("saga", "BoxSet", None));
        h.engine.process_card(watched).await;
        h.engine.process_card(unwatched).await;
        h.engine.process_card(boxset).await;

        assert_eq!(blurred(&h, watched), 0);
        assert_eq!(blurred(&h, unwatched), 1);
        // Movie titles stay readable
        assert_eq!(title_text(&h, unwatched), "Secret title m2");
        assert_eq!(blurred(&h, boxset), 1);
    }

    #[tokio::test]
    async fn test_season_cards_follow_boundary() {
        let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
        h.engine.set_location("#/details?id=show");
        let current = h.insert(&card("show-s1", "Season", Some("show")));
        let future = h.insert(&card("show-s2", "Season", Some("show")));

        h.engine.process_card(current).await;
        h.engine.process_card(future).await;
        assert_eq!(blurred(&h, current), 0);
        assert_eq!(blurred(&h, future), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_open_by_default() {
        let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
        h.engine.source().fail_item(&ItemId::from("e13"));
        let card = h.insert(&card("e13", "Episode", Some("show")));
        h.engine.process_card(card).await;

        assert_eq!(blurred(&h, card), 0);
        assert_eq!(state(&h, card).as_deref(), Some(marker::STATE_SCANNED));
        assert!(h.engine.cards.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_fail_closed() {
        let settings = Settings {
            fail_closed: true,
            ..Settings::default()
        };
        let h = Harness::new(gap_library(), settings, vec![series_rule("show")]);
        h.engine.source().fail_item(&ItemId::from("e13"));
        let card = h.insert(&card("e13", "Episode", Some("show")));
        h.engine.process_card(card).await;

        assert_eq!(blurred(&h, card), 1);
        assert_eq!(state(&h, card).as_deref(), Some(marker::STATE_SCANNED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_cards_share_one_lookup() {
        LocalSet::new()
            .run_until(async {
                let library = gap_library();
                library.set_latency(Duration::from_millis(50));
                let h = Harness::new(library, Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let first = h.insert(&section("Next Up", vec![card("e13", "Episode", Some("show"))]));
                let second = h.insert(&section("Latest", vec![card("e13", "Episode", Some("show"))]));

                assert_eq!(h.engine.filter_new_cards().await, 2);
                assert_eq!(h.fetches(), 1);
                assert_eq!(blurred(&h, first), 1);
                assert_eq!(blurred(&h, second), 1);
                assert_eq!(
                    h.engine.cards.borrow().decision(&ItemId::from("e13")),
                    Some(&CardDecision::Redact {
                        label: Some("S1E3".to_string()),
                        past_boundary: true
                    })
                );

                // Nothing left to visit
                assert_eq!(h.engine.filter_new_cards().await, 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_decision_from_before_reset_is_discarded() {
        LocalSet::new()
            .run_until(async {
                let library = gap_library();
                library.set_latency(Duration::from_millis(50));
                let h = Harness::new(library, Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let card = h.insert(&card("e13", "Episode", Some("show")));

                let engine = Rc::clone(&h.engine);
                let task = tokio::task::spawn_local(async move { engine.process_card(card).await });
                tokio::time::sleep(Duration::from_millis(10)).await;
                h.engine.remove_rule(&ItemId::from("show"));
                task.await.unwrap();

                assert_eq!(blurred(&h, card), 0);
                assert_eq!(state(&h, card), None);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_all_cards_reprocesses() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let card = h.insert(&card("e13", "Episode", Some("show")));
                h.engine.filter_new_cards().await;
                assert_eq!(h.fetches(), 1);

                assert_eq!(h.engine.filter_all_cards().await, 1);
                assert_eq!(h.fetches(), 2);
                assert_eq!(blurred(&h, card), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_disabled_engine_leaves_cards_unmarked() {
        let settings = Settings {
            enabled: false,
            ..Settings::default()
        };
        let h = Harness::new(gap_library(), settings, vec![series_rule("show")]);
        let card = h.insert(&card("e13", "Episode", Some("show")));
        h.engine.process_card(card).await;
        assert_eq!(state(&h, card), None);
        assert_eq!(h.fetches(), 0);
    }
}
