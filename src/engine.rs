//! The spoiler protection service
//!
//! [`SpoilerEngine`] owns every piece of protection state for one page
//! session: settings, the rule registry, the per-item card table, the detail
//! page state and the reveal timers. It is shared as `Rc` on a
//! single-threaded runtime; timers and rescans are spawned with
//! `spawn_local`, so the engine must be driven from inside a
//! `tokio::task::LocalSet`.

use anyhow::{Context, Result};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::boundary::{compute_boundary, BoundaryCache};
use crate::card::CardTable;
use crate::config::Settings;
use crate::constants::{host, marker, text, timing};
use crate::detail::DetailPageState;
use crate::dom::{Document, NodeId};
use crate::host::Host;
use crate::navigation::{location_item_id, NavigationEvent};
use crate::redaction;
use crate::registry::ProtectionRegistry;
use crate::router::{Pass, RouterState};
use crate::source::MediaSource;
use crate::surface::{classify_location, Surface, SurfaceCache};
use crate::types::{ItemId, MediaItem, ProtectionRule, RuleType, WatchBoundary};

/// Result of a protection toggle request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Enabled,
    Disabled,
    /// Disabling needs the user to confirm first; nothing changed
    NeedsConfirmation,
    /// Only series, movies and box sets carry rules
    NotProtectable,
}

pub struct SpoilerEngine<S> {
    this: Weak<Self>,
    pub(crate) source: S,
    pub(crate) host: Rc<dyn Host>,
    document: Rc<RefCell<Document>>,
    pub(crate) settings: RefCell<Settings>,
    pub(crate) registry: RefCell<ProtectionRegistry>,
    location: RefCell<String>,
    pub(crate) surfaces: RefCell<SurfaceCache>,
    pub(crate) cards: RefCell<CardTable>,
    pub(crate) detail: RefCell<DetailPageState>,
    pub(crate) router: RouterState,
    reveal_all: Cell<bool>,
    /// Reveal scope → generation of its pending rehide
    reveals: RefCell<HashMap<NodeId, u64>>,
    reveal_counter: Cell<u64>,
}

impl<S: MediaSource + 'static> SpoilerEngine<S> {
    pub fn new(
        source: S,
        host: Rc<dyn Host>,
        document: Rc<RefCell<Document>>,
        mut settings: Settings,
        registry: ProtectionRegistry,
    ) -> Rc<Self> {
        settings.validate_and_clamp();
        info!(
            enabled = settings.enabled,
            rules = registry.active_count(),
            artwork = ?settings.artwork_policy,
            "Spoiler engine created"
        );
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            source,
            host,
            document,
            settings: RefCell::new(settings),
            registry: RefCell::new(registry),
            location: RefCell::new(String::new()),
            surfaces: RefCell::new(SurfaceCache::new()),
            cards: RefCell::new(CardTable::new()),
            detail: RefCell::new(DetailPageState::default()),
            router: RouterState::default(),
            reveal_all: Cell::new(false),
            reveals: RefCell::new(HashMap::new()),
            reveal_counter: Cell::new(0),
        })
    }

    /// Shared handle to the observed document
    pub fn document(&self) -> Rc<RefCell<Document>> {
        Rc::clone(&self.document)
    }

    pub(crate) fn doc(&self) -> Ref<'_, Document> {
        self.document.borrow()
    }

    pub(crate) fn doc_mut(&self) -> RefMut<'_, Document> {
        self.document.borrow_mut()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    pub fn location(&self) -> String {
        self.location.borrow().clone()
    }

    pub(crate) fn set_location(&self, location: &str) {
        *self.location.borrow_mut() = location.to_string();
    }

    pub fn page_surface(&self) -> Surface {
        classify_location(&self.location.borrow())
    }

    /// Item id named by the current location, if any
    pub(crate) fn location_item(&self) -> Option<ItemId> {
        location_item_id(&self.location.borrow())
    }

    pub(crate) fn label(&self, key: &str, fallback: &str) -> String {
        self.host.t_fallback(key, fallback)
    }

    pub fn is_protected(&self, item_id: &ItemId) -> bool {
        self.registry.borrow().is_protected(item_id)
    }

    pub fn get_rule(&self, item_id: &ItemId) -> Option<ProtectionRule> {
        self.registry.borrow().get_rule(item_id).cloned()
    }

    pub fn rules(&self) -> Vec<ProtectionRule> {
        self.registry.borrow().rules().values().cloned().collect()
    }

    /// Insert or replace a rule. Everything derived from the old rule set is
    /// dropped (redactions, markers and caches) and a page rescan is
    /// scheduled to rebuild it.
    pub fn set_rule(&self, rule: ProtectionRule) {
        self.registry.borrow_mut().set_rule(rule);
        self.invalidate();
        self.sync_observer();
        self.schedule_page_rescan();
    }

    pub fn remove_rule(&self, item_id: &ItemId) -> Option<ProtectionRule> {
        let removed = self.registry.borrow_mut().remove_rule(item_id);
        if removed.is_some() {
            self.invalidate();
            self.sync_observer();
            self.schedule_page_rescan();
        }
        removed
    }

    /// Debounced rescan of the cards and of the detail page or overlay the
    /// current surface shows
    fn schedule_page_rescan(&self) {
        if !self.settings.borrow().enabled {
            return;
        }
        let Some(engine) = self.this.upgrade() else {
            return;
        };
        engine.schedule_pass(Pass::Cards);
        match self.page_surface() {
            Surface::Detail => engine.schedule_pass(Pass::Detail),
            Surface::Player => engine.schedule_pass(Pass::Overlay),
            _ => {}
        }
    }

    /// Replace the settings and re-run the page under the new ones
    pub async fn update_settings(self: &Rc<Self>, mut settings: Settings) {
        settings.validate_and_clamp();
        info!(enabled = settings.enabled, artwork = ?settings.artwork_policy, "Settings updated");
        *self.settings.borrow_mut() = settings;
        self.invalidate();
        self.sync_observer();
        self.process_current_page().await;
    }

    /// Drop all redactions and derived state after a rule or settings change
    fn invalidate(&self) {
        {
            let mut doc = self.doc_mut();
            let body = doc.body();
            let cleared = redaction::clear(&mut doc, body);
            debug!(cleared, "Cleared redactions");
        }
        self.reset_card_state();
        self.detail.borrow_mut().forget_item();
        self.clear_detail_pages();
    }

    /// Forget card decisions, section surfaces and element markers
    pub(crate) fn reset_card_state(&self) {
        self.cards.borrow_mut().reset();
        self.surfaces.borrow_mut().clear();
        let mut doc = self.doc_mut();
        let body = doc.body();
        for node in doc.descendants(body) {
            doc.remove_attr(node, marker::STATE_ATTR);
            doc.remove_attr(node, marker::PAST_BOUNDARY_ATTR);
        }
    }

    /// Undo detail page redactions and drop the processed markers, so the
    /// next item shown in the same container starts clean
    fn clear_detail_pages(&self) {
        let mut doc = self.doc_mut();
        let body = doc.body();
        for page in doc.find_all_by_class(body, host::DETAIL_PAGE_CLASS) {
            let cleared = redaction::clear(&mut doc, page);
            if cleared > 0 {
                trace!(cleared, "Cleared detail page redactions");
            }
        }
        for node in doc.descendants(body) {
            doc.remove_attr(node, marker::DETAIL_ATTR);
        }
    }

    /// Handle a location change: reset per-page state, then schedule the
    /// rescans the new surface needs
    pub fn navigate(self: &Rc<Self>, location: &str) {
        self.set_location(location);
        let surface = self.page_surface();
        info!(location = %location, surface = %surface, "Navigated");

        self.detail.borrow_mut().reset();
        self.clear_detail_pages();
        self.reset_card_state();

        self.schedule_pass(Pass::Cards);
        match surface {
            Surface::Detail => self.schedule_detail_passes(),
            Surface::Player => self.schedule_pass(Pass::Overlay),
            _ => {}
        }
    }

    /// Two passes per detail visit: the host renders the page in stages
    fn schedule_detail_passes(self: &Rc<Self>) {
        let generation = self.detail.borrow().generation;
        for (delay_ms, refresh) in [(timing::DETAIL_SHORT_PASS_MS, false), (timing::DETAIL_LONG_PASS_MS, true)] {
            let engine = Rc::clone(self);
            tokio::task::spawn_local(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if engine.detail.borrow().generation != generation {
                    trace!("Skipping detail pass scheduled before navigation");
                    return;
                }
                if refresh {
                    engine.refresh_detail_page().await;
                } else {
                    engine.handle_detail_page_mutation().await;
                }
            });
        }
    }

    /// Follow navigation events until the bus closes
    pub async fn run_navigation(self: Rc<Self>, mut events: broadcast::Receiver<NavigationEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.navigate(&event.location),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Navigation listener lagged, rescanning current page");
                    self.process_current_page().await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Navigation bus closed");
                    break;
                }
            }
        }
    }

    /// Full rescan of the current page: every card, the detail page and the
    /// player overlay
    pub async fn process_current_page(self: &Rc<Self>) {
        self.filter_all_cards().await;
        match self.page_surface() {
            Surface::Detail => self.refresh_detail_page().await,
            Surface::Player => {
                if let Err(e) = self.redact_player_overlay().await {
                    warn!(error = ?e, "Player overlay pass failed");
                }
            }
            _ => {}
        }
    }

    /// Re-run the detail handler even if the item was already processed
    pub async fn refresh_detail_page(self: &Rc<Self>) {
        self.detail.borrow_mut().forget_item();
        self.handle_detail_page_mutation().await;
    }

    pub fn is_reveal_all_active(&self) -> bool {
        self.reveal_all.get()
    }

    /// Lift the redactions around `node` for the reveal window. Returns the
    /// number of elements revealed.
    pub fn reveal(self: &Rc<Self>, node: NodeId) -> usize {
        let (scope, revealed) = {
            let mut doc = self.doc_mut();
            let scope = doc
                .closest(node, |d, n| {
                    d.has_class(n, host::CARD_CLASS) || d.has_class(n, host::LIST_ITEM_CLASS)
                })
                .unwrap_or(node);
            (scope, redaction::reveal(&mut doc, scope))
        };
        if revealed == 0 {
            return 0;
        }

        let generation = self.reveal_counter.get() + 1;
        self.reveal_counter.set(generation);
        self.reveals.borrow_mut().insert(scope, generation);
        let delay = Duration::from_millis(self.settings.borrow().reveal_duration_ms);
        debug!(revealed, delay_ms = delay.as_millis() as u64, "Revealed");

        let engine = Rc::clone(self);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if engine.reveal_all.get() {
                return;
            }
            if engine.reveals.borrow().get(&scope) != Some(&generation) {
                return;
            }
            engine.reveals.borrow_mut().remove(&scope);
            let mut doc = engine.doc_mut();
            if doc.exists(scope) {
                let rehidden = redaction::rehide(&mut doc, scope);
                debug!(rehidden, "Reveal window ended");
            }
        });
        revealed
    }

    /// Temporarily lift every redaction on the page
    pub fn reveal_all(&self) -> usize {
        self.reveal_all.set(true);
        let mut doc = self.doc_mut();
        let body = doc.body();
        let revealed = redaction::reveal(&mut doc, body);
        info!(revealed, "Reveal all started");
        revealed
    }

    /// End reveal-all: restore every redaction and pick up cards that
    /// appeared in the meantime
    pub async fn end_reveal_all(self: &Rc<Self>) {
        if !self.reveal_all.replace(false) {
            return;
        }
        self.reveals.borrow_mut().clear();
        {
            let mut doc = self.doc_mut();
            let body = doc.body();
            let rehidden = redaction::rehide(&mut doc, body);
            info!(rehidden, "Reveal all ended");
        }
        self.filter_new_cards().await;
        if self.page_surface() == Surface::Detail {
            self.refresh_detail_page().await;
        }
    }

    /// Flip protection of a series, movie or box set. Disabling asks for
    /// confirmation first when the setting requires it.
    pub async fn toggle_protection(self: &Rc<Self>, item: &MediaItem, confirmed: bool) -> ToggleOutcome {
        let Some(rule_type) = RuleType::from_kind(item.kind) else {
            debug!(item = %item.id, kind = ?item.kind, "Item cannot carry a protection rule");
            return ToggleOutcome::NotProtectable;
        };

        let outcome = if self.is_protected(&item.id) {
            if self.settings.borrow().show_disable_confirmation && !confirmed {
                return ToggleOutcome::NeedsConfirmation;
            }
            let mut rule = ProtectionRule::enabled(item.id.clone(), item.name.clone(), rule_type);
            rule.enabled = false;
            self.set_rule(rule);
            self.host.toast(&self.label(text::TOGGLE_OFF_KEY, text::TOGGLE_OFF_FALLBACK));
            ToggleOutcome::Disabled
        } else {
            self.set_rule(ProtectionRule::enabled(item.id.clone(), item.name.clone(), rule_type));
            self.host.toast(&self.label(text::TOGGLE_ON_KEY, text::TOGGLE_ON_FALLBACK));
            ToggleOutcome::Enabled
        };
        self.process_current_page().await;
        outcome
    }

    /// Watch boundary of a series, memoized for one pass
    pub(crate) async fn boundary_for(
        &self,
        series_id: &ItemId,
        pass: &RefCell<BoundaryCache>,
    ) -> Result<Option<WatchBoundary>> {
        if let Some(boundary) = pass.borrow().get(series_id) {
            return Ok(boundary);
        }
        let episodes = self
            .source
            .episodes(series_id)
            .await
            .with_context(|| format!("Failed to list episodes of series {series_id}"))?;
        let watches: Vec<_> = episodes.iter().filter_map(MediaItem::episode_watch).collect();
        let boundary = compute_boundary(&watches);
        debug!(series = %series_id, boundary = ?boundary, episodes = watches.len(), "Computed watch boundary");
        pass.borrow_mut().insert(series_id.clone(), boundary);
        Ok(boundary)
    }

    /// First protected box set containing the movie
    pub(crate) async fn protected_collection_for_movie(&self, movie_id: &ItemId) -> Result<Option<ItemId>> {
        let collections = self
            .source
            .collections_for_movie(movie_id)
            .await
            .with_context(|| format!("Failed to look up collections of movie {movie_id}"))?;
        Ok(collections.into_iter().find(|boxset| self.is_protected(boxset)))
    }
}

/// Shared setup for the engine test modules
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::dom::ElementSpec;
    use crate::host::LogHost;
    use crate::source::JsonLibrary;
    use std::collections::BTreeMap;

    pub struct Harness {
        pub engine: Rc<SpoilerEngine<JsonLibrary>>,
        pub host: Rc<LogHost>,
    }

    impl Harness {
        pub fn new(library: JsonLibrary, settings: Settings, rules: Vec<ProtectionRule>) -> Self {
            let host = Rc::new(LogHost::new());
            let rules: BTreeMap<_, _> = rules.into_iter().map(|r| (r.item_id.clone(), r)).collect();
            let registry = ProtectionRegistry::new(rules, Box::new(crate::registry::NullRuleStore));
            let engine = SpoilerEngine::new(
                library,
                host.clone(),
                Rc::new(RefCell::new(Document::new())),
                settings,
                registry,
            );
            Self { engine, host }
        }

        /// Insert `spec` under the body
        pub fn insert(&self, spec: &ElementSpec) -> NodeId {
            let doc = self.engine.document();
            let mut doc = doc.borrow_mut();
            let body = doc.body();
            doc.insert(body, spec)
        }

        pub fn fetches(&self) -> usize {
            self.engine.source().item_fetches()
        }
    }

    pub fn series_rule(id: &str) -> ProtectionRule {
        ProtectionRule::enabled(ItemId::from(id), id, RuleType::Series)
    }

    /// Card or list row markup as the host renders it
    pub fn card(id: &str, kind: &str, series: Option<&str>) -> ElementSpec {
        let mut spec = ElementSpec::new("div")
            .class(host::CARD_CLASS)
            .attr(host::DATA_ID, id)
            .attr(host::DATA_TYPE, kind)
            .child(ElementSpec::new("div").class(host::CARD_IMAGE_CLASS))
            .child(ElementSpec::new("div").class(host::CARD_TEXT_CLASS).text("The Show"))
            .child(ElementSpec::new("div").class(host::CARD_TEXT_CLASS).text(&format!("Secret title {id}")));
        if let Some(series) = series {
            spec = spec.attr(host::DATA_SERIES_ID, series);
        }
        spec
    }

    pub fn section(title: &str, cards: Vec<ElementSpec>) -> ElementSpec {
        let mut spec = ElementSpec::new("div")
            .class(host::SECTION_CLASS)
            .child(ElementSpec::new("h2").class(host::SECTION_TITLE_CLASS).text(title));
        for card in cards {
            spec = spec.child(card);
        }
        spec
    }

    pub fn blurred(harness: &Harness, scope: NodeId) -> usize {
        let doc = harness.engine.document();
        let doc = doc.borrow();
        std::iter::once(scope)
            .chain(doc.descendants(scope))
            .filter(|n| doc.has_class(*n, marker::BLUR_CLASS))
            .count()
    }

    pub fn title_text(harness: &Harness, card: NodeId) -> String {
        let doc = harness.engine.document();
        let doc = doc.borrow();
        redaction::card_text_lines(&doc, card)
            .last()
            .map(|n| doc.text(*n).to_string())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::dom::ElementSpec;
    use crate::source::fixtures::*;
    use tokio::task::LocalSet;

    #[tokio::test(start_paused = true)]
    async fn test_reveal_rehides_after_duration() {
        LocalSet::new()
            .run_until(async {
                let settings = Settings {
                    reveal_duration_ms: 2000,
                    ..Settings::default()
                };
                let h = Harness::new(gap_library(), settings, vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let card = h.insert(&card("e13", "Episode", Some("show")));
                h.engine.process_card(card).await;
                assert_eq!(blurred(&h, card), 1);

                assert_eq!(h.engine.reveal(card), 2);
                assert_eq!(blurred(&h, card), 0);
                assert_eq!(title_text(&h, card), "Secret title e13");

                tokio::time::sleep(Duration::from_millis(1999)).await;
                assert_eq!(blurred(&h, card), 0);

                tokio::time::sleep(Duration::from_millis(2)).await;
                assert_eq!(blurred(&h, card), 1);
                assert_eq!(title_text(&h, card), "S1E3");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveal_all_suppresses_rehide() {
        LocalSet::new()
            .run_until(async {
                let settings = Settings {
                    reveal_duration_ms: 2000,
                    ..Settings::default()
                };
                let h = Harness::new(gap_library(), settings, vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let first = h.insert(&card("e13", "Episode", Some("show")));
                h.engine.process_card(first).await;

                h.engine.reveal(first);
                h.engine.reveal_all();
                tokio::time::sleep(Duration::from_millis(3000)).await;
                assert_eq!(blurred(&h, first), 0);

                // Cards rendered during reveal-all are left alone
                let late = h.insert(&card("e21", "Episode", Some("show")));
                h.engine.process_card(late).await;
                assert_eq!(blurred(&h, late), 0);

                h.engine.end_reveal_all().await;
                assert_eq!(blurred(&h, first), 1);
                assert_eq!(blurred(&h, late), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_reveal_restarts_window() {
        LocalSet::new()
            .run_until(async {
                let settings = Settings {
                    reveal_duration_ms: 2000,
                    ..Settings::default()
                };
                let h = Harness::new(gap_library(), settings, vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let card = h.insert(&card("e13", "Episode", Some("show")));
                h.engine.process_card(card).await;

                h.engine.reveal(card);
                tokio::time::sleep(Duration::from_millis(1500)).await;
                assert_eq!(h.engine.reveal(card), 2);

                // The first window's timer no longer owns the card
                tokio::time::sleep(Duration::from_millis(600)).await;
                assert_eq!(blurred(&h, card), 0);

                tokio::time::sleep(Duration::from_millis(1500)).await;
                assert_eq!(blurred(&h, card), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_protection_needs_confirmation() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let show = series("show", "The Show");

                let outcome = h.engine.toggle_protection(&show, false).await;
                assert_eq!(outcome, ToggleOutcome::NeedsConfirmation);
                assert!(h.engine.is_protected(&show.id));

                let outcome = h.engine.toggle_protection(&show, true).await;
                assert_eq!(outcome, ToggleOutcome::Disabled);
                assert!(!h.engine.is_protected(&show.id));
                assert_eq!(h.engine.get_rule(&show.id).map(|r| r.enabled), Some(false));

                // Enabling never asks
                assert_eq!(h.engine.toggle_protection(&show, false).await, ToggleOutcome::Enabled);
                assert!(h.engine.is_protected(&show.id));
                assert_eq!(h.host.toasts(), vec!["Spoiler protection off", "Spoiler protection on"]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_without_confirmation_setting() {
        LocalSet::new()
            .run_until(async {
                let settings = Settings {
                    show_disable_confirmation: false,
                    ..Settings::default()
                };
                let h = Harness::new(gap_library(), settings, vec![series_rule("show")]);
                let show = series("show", "The Show");
                assert_eq!(h.engine.toggle_protection(&show, false).await, ToggleOutcome::Disabled);

                let episode = episode("e13", "show", 1, 3, false);
                assert_eq!(h.engine.toggle_protection(&episode, true).await, ToggleOutcome::NotProtectable);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_change_clears_redactions() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let card = h.insert(&card("e13", "Episode", Some("show")));
                h.engine.process_card(card).await;
                assert_eq!(blurred(&h, card), 1);

                h.engine.remove_rule(&ItemId::from("show"));
                assert_eq!(blurred(&h, card), 0);
                assert_eq!(title_text(&h, card), "Secret title e13");
                let doc = h.engine.document();
                assert_eq!(doc.borrow().attr(card, marker::STATE_ATTR), None);

                // The rescan finds nothing left to protect
                tokio::time::sleep(Duration::from_millis(500)).await;
                assert_eq!(blurred(&h, card), 0);
                assert_eq!(doc.borrow().attr(card, marker::STATE_ATTR), Some(marker::STATE_SCANNED));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_rule_change_keeps_redactions() {
        LocalSet::new()
            .run_until(async {
                let mut library = gap_library();
                library.add_item(series("other", "Other Show"));
                let h = Harness::new(library, Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let card = h.insert(&card("e13", "Episode", Some("show")));
                h.engine.process_card(card).await;
                assert_eq!(blurred(&h, card), 1);

                h.engine.set_rule(series_rule("other"));
                tokio::time::sleep(Duration::from_millis(500)).await;
                assert_eq!(blurred(&h, card), 1);
                assert_eq!(title_text(&h, card), "S1E3");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rule_change_on_detail_page_reapplies() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/details?id=e13");
                let page = h.insert(
                    &ElementSpec::new("div")
                        .class(host::DETAIL_PAGE_CLASS)
                        .child(ElementSpec::new("h1").class(host::ITEM_NAME_CLASS).text("Secret title e13")),
                );
                h.engine.handle_detail_page_mutation().await;
                let title = h.engine.document().borrow().find_by_class(page, host::ITEM_NAME_CLASS).unwrap();
                assert_eq!(h.engine.document().borrow().text(title), "S1E3");

                h.engine.set_rule(series_rule("other"));
                assert_eq!(h.engine.document().borrow().text(title), "Secret title e13");
                tokio::time::sleep(Duration::from_millis(500)).await;
                assert_eq!(h.engine.document().borrow().text(title), "S1E3");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_rescans_with_new_policy() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/home");
                let card = h.insert(&card("e13", "Episode", Some("show")));
                h.engine.process_card(card).await;

                let settings = Settings {
                    artwork_policy: crate::config::ArtworkPolicy::Generic,
                    ..h.engine.settings()
                };
                h.engine.update_settings(settings).await;

                let doc = h.engine.document();
                let doc = doc.borrow();
                let art = redaction::card_artwork(&doc, card).unwrap();
                assert!(doc.has_class(art, marker::GENERIC_CLASS));
                assert!(!doc.has_class(art, marker::BLUR_CLASS));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_memoized_within_pass() {
        let h = Harness::new(gap_library(), Settings::default(), vec![]);
        let pass = RefCell::new(BoundaryCache::new());
        let show = ItemId::from("show");
        assert_eq!(h.engine.boundary_for(&show, &pass).await.unwrap(), Some(WatchBoundary::new(1, 2)));

        // A failing source is not consulted again within the pass
        h.engine.source().fail_item(&show);
        assert_eq!(h.engine.boundary_for(&show, &pass).await.unwrap(), Some(WatchBoundary::new(1, 2)));
        let fresh = RefCell::new(BoundaryCache::new());
        assert!(h.engine.boundary_for(&show, &fresh).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_bus_drives_engine() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
                let bus = crate::navigation::NavigationBus::new();
                let listener = tokio::task::spawn_local(Rc::clone(&h.engine).run_navigation(bus.subscribe()));

                let card = h.insert(&card("e13", "Episode", Some("show")));
                bus.publish("#/home");
                tokio::time::sleep(Duration::from_millis(500)).await;
                assert_eq!(h.engine.location(), "#/home");
                assert_eq!(blurred(&h, card), 1);

                drop(bus);
                listener.await.unwrap();
            })
            .await;
    }
}
