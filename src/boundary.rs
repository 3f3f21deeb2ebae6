//! Watch boundary calculation
//!
//! The boundary of a series is the last (season, episode) of the contiguous
//! watched run starting at its first regular episode. Episodes watched past
//! a gap never extend it. Specials (season 0) sit outside the walk.

use std::collections::HashMap;

use crate::constants::text;
use crate::host::Host;
use crate::types::{EpisodePosition, EpisodeWatch, ItemId, WatchBoundary};

/// Compute the boundary from the full episode list of a series.
/// Returns `None` when the first regular episode is unwatched.
pub fn compute_boundary(episodes: &[EpisodeWatch]) -> Option<WatchBoundary> {
    let mut regular: Vec<&EpisodeWatch> = episodes
        .iter()
        .filter(|ep| !ep.position.is_special())
        .collect();
    regular.sort_by_key(|ep| ep.position);

    let mut boundary = None;
    for ep in regular {
        if !ep.played {
            break;
        }
        boundary = Some(WatchBoundary::new(ep.position.season, ep.position.last_episode()));
    }
    boundary
}

/// True when the episode lies past the boundary (or nothing is watched)
pub fn should_redact_episode(position: &EpisodePosition, boundary: Option<WatchBoundary>) -> bool {
    match boundary {
        None => true,
        Some(b) => (position.season, position.episode) > (b.season, b.episode),
    }
}

/// True when the season's first episode lies past the boundary
pub fn should_redact_season(season: u32, boundary: Option<WatchBoundary>) -> bool {
    match boundary {
        None => true,
        Some(b) => season > b.season,
    }
}

/// Every episode of `season` is played. An empty season is not "fully
/// watched".
pub fn season_fully_watched(episodes: &[EpisodeWatch], season: u32) -> bool {
    let mut in_season = episodes.iter().filter(|ep| ep.position.season == season).peekable();
    in_season.peek().is_some() && in_season.all(|ep| ep.played)
}

/// Safe display label: `S1E3`, `S1E3-E4`, or `Special 2` for season 0
pub fn format_episode_label(position: &EpisodePosition, host: &dyn Host) -> String {
    if position.is_special() {
        let special = host.t_fallback(text::SPECIAL_KEY, text::SPECIAL_FALLBACK);
        return format!("{special} {}", position.episode);
    }
    match position.episode_end {
        Some(end) if end > position.episode => {
            format!("S{}E{}-E{}", position.season, position.episode, end)
        }
        _ => format!("S{}E{}", position.season, position.episode),
    }
}

/// Per-pass memo of series boundaries. Created for one surface pass and
/// dropped with it, so watch state is re-read on the next pass.
#[derive(Debug, Default)]
pub struct BoundaryCache {
    entries: HashMap<ItemId, Option<WatchBoundary>>,
}

impl BoundaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(boundary)` when cached (the boundary itself may be `None`)
    pub fn get(&self, series_id: &ItemId) -> Option<Option<WatchBoundary>> {
        self.entries.get(series_id).copied()
    }

    pub fn insert(&mut self, series_id: ItemId, boundary: Option<WatchBoundary>) {
        self.entries.insert(series_id, boundary);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
