//! Mutation router: one observer over the document, fanned out into
//! debounced card, detail and overlay passes
//!
//! Observation is connected only while at least one rule is enabled. Each
//! pass kind has its own trailing debounce; a newer schedule bumps the
//! generation and the older timer exits when it wakes.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::constants::{host, timing};
use crate::dom::{Document, NodeId};
use crate::engine::SpoilerEngine;
use crate::source::MediaSource;

/// Which passes a batch of added nodes calls for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationFlags {
    pub card: bool,
    pub detail: bool,
    pub osd: bool,
}

impl MutationFlags {
    pub fn any(&self) -> bool {
        self.card || self.detail || self.osd
    }

    fn all(&self) -> bool {
        self.card && self.detail && self.osd
    }
}

fn is_card(doc: &Document, node: NodeId) -> bool {
    doc.has_class(node, host::CARD_CLASS) || doc.has_class(node, host::LIST_ITEM_CLASS)
}

/// Classify added subtrees. A node counts for detail or OSD when it lands
/// inside those containers, not only when it is one.
pub fn classify_batch(doc: &Document, added: &[NodeId]) -> MutationFlags {
    let mut flags = MutationFlags::default();
    for &node in added {
        if !flags.detail && doc.closest(node, |d, n| d.has_class(n, host::DETAIL_PAGE_CLASS)).is_some() {
            flags.detail = true;
        }
        if !flags.osd && doc.closest(node, |d, n| d.has_class(n, host::OSD_CLASS)).is_some() {
            flags.osd = true;
        }
        for n in std::iter::once(node).chain(doc.descendants(node)) {
            flags.card |= is_card(doc, n);
            flags.detail |= doc.has_class(n, host::DETAIL_PAGE_CLASS);
            flags.osd |= doc.has_class(n, host::OSD_CLASS);
            if flags.all() {
                return flags;
            }
        }
    }
    flags
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pass {
    Cards,
    Detail,
    Overlay,
}

impl Pass {
    fn delay(&self) -> Duration {
        Duration::from_millis(match self {
            Pass::Cards => timing::CARD_DEBOUNCE_MS,
            Pass::Detail => timing::DETAIL_DEBOUNCE_MS,
            Pass::Overlay => timing::OSD_DEBOUNCE_MS,
        })
    }
}

#[derive(Debug, Default)]
pub struct RouterState {
    connected: Cell<bool>,
    cards: Cell<u64>,
    detail: Cell<u64>,
    overlay: Cell<u64>,
}

impl RouterState {
    fn generation(&self, pass: Pass) -> &Cell<u64> {
        match pass {
            Pass::Cards => &self.cards,
            Pass::Detail => &self.detail,
            Pass::Overlay => &self.overlay,
        }
    }
}

impl<S: MediaSource + 'static> SpoilerEngine<S> {
    pub fn is_observer_connected(&self) -> bool {
        self.router.connected.get()
    }

    pub fn connect_observer(&self) {
        if self.router.connected.replace(true) {
            return;
        }
        self.doc_mut().set_observing(true);
        info!("Mutation observer connected");
    }

    pub fn disconnect_observer(&self) {
        if !self.router.connected.replace(false) {
            return;
        }
        self.doc_mut().set_observing(false);
        info!("Mutation observer disconnected");
    }

    /// Connected exactly while protection is on and some rule is enabled
    pub fn sync_observer(&self) {
        let wanted = self.settings.borrow().enabled && self.registry.borrow().active_count() > 0;
        if wanted {
            self.connect_observer();
        } else {
            self.disconnect_observer();
        }
    }

    /// Initial wiring: connect if needed and scan what is already rendered
    pub fn setup_observers(self: &Rc<Self>) {
        self.sync_observer();
        if self.is_observer_connected() {
            self.schedule_pass(Pass::Cards);
        }
    }

    /// Drain the document's mutation journal and schedule the passes the
    /// batch calls for. Called by the host after it applies a render.
    pub fn handle_mutations(self: &Rc<Self>) -> MutationFlags {
        if !self.is_observer_connected() {
            return MutationFlags::default();
        }
        let flags = {
            let mut doc = self.doc_mut();
            let added = doc.take_mutations();
            if added.is_empty() {
                return MutationFlags::default();
            }
            classify_batch(&doc, &added)
        };
        trace!(?flags, "Mutation batch");
        if flags.card {
            self.schedule_pass(Pass::Cards);
        }
        if flags.detail {
            self.schedule_pass(Pass::Detail);
        }
        if flags.osd {
            self.schedule_pass(Pass::Overlay);
        }
        flags
    }

    /// Trailing debounce: only the latest schedule per pass kind runs
    pub(crate) fn schedule_pass(self: &Rc<Self>, pass: Pass) {
        let counter = self.router.generation(pass);
        let generation = counter.get() + 1;
        counter.set(generation);

        let engine = Rc::clone(self);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(pass.delay()).await;
            if engine.router.generation(pass).get() != generation {
                return;
            }
            engine.run_pass(pass).await;
        });
    }

    async fn run_pass(self: &Rc<Self>, pass: Pass) {
        debug!(?pass, "Running pass");
        match pass {
            Pass::Cards => {
                self.filter_new_cards().await;
            }
            Pass::Detail => self.handle_detail_page_mutation().await,
            Pass::Overlay => {
                if let Err(e) = self.redact_player_overlay().await {
                    warn!(error = ?e, "Player overlay pass failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::constants::marker;
    use crate::dom::ElementSpec;
    use crate::engine::testing::*;
    use crate::source::fixtures::*;
    use crate::types::ItemId;
    use tokio::task::LocalSet;

    #[test]
    fn test_classify_batch() {
        let mut doc = Document::new();
        let body = doc.body();
        let detail = doc.insert(body, &ElementSpec::new("div").class(host::DETAIL_PAGE_CLASS));
        let overview = doc.insert(detail, &ElementSpec::new("p").class(host::OVERVIEW_CLASS));
        let row = doc.insert(
            body,
            &ElementSpec::new("div").child(ElementSpec::new("div").class(host::LIST_ITEM_CLASS)),
        );
        let osd = doc.insert(body, &ElementSpec::new("div").class(host::OSD_CLASS));
        let plain = doc.insert(body, &ElementSpec::new("span"));

        assert_eq!(
            classify_batch(&doc, &[overview]),
            MutationFlags {
                detail: true,
                ..MutationFlags::default()
            }
        );
        assert_eq!(
            classify_batch(&doc, &[row]),
            MutationFlags {
                card: true,
                ..MutationFlags::default()
            }
        );
        assert!(classify_batch(&doc, &[osd]).osd);
        assert!(!classify_batch(&doc, &[plain]).any());
    }

    #[tokio::test]
    async fn test_observer_follows_active_rules() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![]);
                h.engine.sync_observer();
                assert!(!h.engine.is_observer_connected());

                h.engine.set_rule(series_rule("show"));
                assert!(h.engine.is_observer_connected());
                assert!(h.engine.document().borrow().is_observing());

                h.engine.remove_rule(&ItemId::from("show"));
                assert!(!h.engine.is_observer_connected());
                assert!(!h.engine.document().borrow().is_observing());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_debounced_into_one_pass() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![series_rule("show")]);
                h.engine.set_location("#/home");
                h.engine.setup_observers();
                assert!(h.engine.is_observer_connected());

                let first = h.insert(&card("e13", "Episode", Some("show")));
                assert!(h.engine.handle_mutations().card);
                tokio::time::sleep(Duration::from_millis(60)).await;

                let second = h.insert(&card("e21", "Episode", Some("show")));
                h.engine.handle_mutations();
                tokio::time::sleep(Duration::from_millis(60)).await;
                // The first timer was superseded
                assert_eq!(h.engine.document().borrow().attr(first, marker::STATE_ATTR), None);

                tokio::time::sleep(Duration::from_millis(60)).await;
                assert_eq!(blurred(&h, first), 1);
                assert_eq!(blurred(&h, second), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_ignored_while_disconnected() {
        LocalSet::new()
            .run_until(async {
                let h = Harness::new(gap_library(), Settings::default(), vec![]);
                h.engine.setup_observers();
                h.insert(&card("e13", "Episode", Some("show")));
                assert!(!h.engine.handle_mutations().any());
            })
            .await;
    }
}
