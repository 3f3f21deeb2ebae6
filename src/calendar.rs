//! Calendar filtering: upcoming and recent episode entries of protected
//! series get their titles replaced before the calendar renders them

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use tracing::{debug, warn};

use crate::boundary::{format_episode_label, should_redact_episode, BoundaryCache};
use crate::engine::SpoilerEngine;
use crate::source::MediaSource;
use crate::types::{EpisodePosition, ItemId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: ItemId,
    pub series_id: Option<ItemId>,
    #[serde(default)]
    pub series_name: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub title: String,
    #[serde(default)]
    pub redacted: bool,
}

impl CalendarEvent {
    fn position(&self) -> Option<EpisodePosition> {
        Some(EpisodePosition::new(self.season?, self.episode?))
    }
}

impl<S: MediaSource + 'static> SpoilerEngine<S> {
    /// Copy of `events` with titles past each series' boundary replaced by
    /// their episode label
    pub async fn filter_calendar_events(&self, events: &[CalendarEvent]) -> Vec<CalendarEvent> {
        let mut filtered = events.to_vec();
        let (enabled, protect_calendar, fail_closed) = {
            let settings = self.settings.borrow();
            (settings.enabled, settings.protect_calendar, settings.fail_closed)
        };
        if !enabled || !protect_calendar {
            return filtered;
        }

        let pass = RefCell::new(BoundaryCache::new());
        for event in &mut filtered {
            let Some(series_id) = event.series_id.clone() else {
                continue;
            };
            if !self.is_protected(&series_id) {
                continue;
            }
            let Some(position) = event.position() else {
                continue;
            };
            let redact = match self.boundary_for(&series_id, &pass).await {
                Ok(boundary) => should_redact_episode(&position, boundary),
                Err(e) => {
                    warn!(series = %series_id, error = ?e, "Calendar boundary lookup failed");
                    fail_closed
                }
            };
            if redact {
                event.title = format_episode_label(&position, self.host.as_ref());
                event.redacted = true;
            }
        }
        debug!(
            events = filtered.len(),
            redacted = filtered.iter().filter(|e| e.redacted).count(),
            "Filtered calendar"
        );
        filtered
    }
}
