//! Shared domain types: item identifiers, protection rules, episode positions
//! and the item shape returned by the media source.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Opaque media item identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Item type as reported by the media source or a card's `data-type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ItemKind {
    Movie,
    Series,
    Season,
    Episode,
    BoxSet,
    #[default]
    #[serde(other)]
    Other,
}

impl ItemKind {
    /// Parse a card `data-type` value (case-insensitive). Unknown → `Other`.
    pub fn from_attr(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "movie" => ItemKind::Movie,
            "series" => ItemKind::Series,
            "season" => ItemKind::Season,
            "episode" => ItemKind::Episode,
            "boxset" => ItemKind::BoxSet,
            _ => ItemKind::Other,
        }
    }
}

/// Item types a protection rule can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    Series,
    Movie,
    BoxSet,
}

impl RuleType {
    pub fn from_kind(kind: ItemKind) -> Option<Self> {
        match kind {
            ItemKind::Series => Some(RuleType::Series),
            ItemKind::Movie => Some(RuleType::Movie),
            ItemKind::BoxSet => Some(RuleType::BoxSet),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::from_kind(ItemKind::from_attr(value))
    }
}

/// A user- or auto-created record marking one item as spoiler-protected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionRule {
    pub item_id: ItemId,
    pub item_name: String,
    pub item_type: RuleType,
    pub enabled: bool,
}

impl ProtectionRule {
    pub fn enabled(item_id: ItemId, item_name: impl Into<String>, item_type: RuleType) -> Self {
        Self {
            item_id,
            item_name: item_name.into(),
            item_type,
            enabled: true,
        }
    }
}

/// Season/episode coordinates of an episode. `episode_end` is set for
/// multi-episode entries (E3-E4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpisodePosition {
    pub season: u32,
    pub episode: u32,
    pub episode_end: Option<u32>,
}

impl EpisodePosition {
    pub fn new(season: u32, episode: u32) -> Self {
        Self {
            season,
            episode,
            episode_end: None,
        }
    }

    pub fn is_special(&self) -> bool {
        self.season == 0
    }

    /// Last episode number covered by this entry
    pub fn last_episode(&self) -> u32 {
        self.episode_end.unwrap_or(self.episode).max(self.episode)
    }
}

impl PartialOrd for EpisodePosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EpisodePosition {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.season, self.episode, self.last_episode()).cmp(&(
            other.season,
            other.episode,
            other.last_episode(),
        ))
    }
}

/// Furthest contiguous watched position of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WatchBoundary {
    pub season: u32,
    pub episode: u32,
}

impl WatchBoundary {
    pub fn new(season: u32, episode: u32) -> Self {
        Self { season, episode }
    }
}

/// Watch state of one episode, input of the boundary walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeWatch {
    pub position: EpisodePosition,
    pub played: bool,
}

/// Per-user playback data attached to an item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UserData {
    pub played: bool,
    pub playback_position_ticks: i64,
}

impl UserData {
    /// No watch progress at all
    pub fn is_untouched(&self) -> bool {
        !self.played && self.playback_position_ticks <= 0
    }
}

/// Item shape returned by the media source (host item JSON, read-only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaItem {
    pub id: ItemId,
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: ItemKind,
    pub provider_ids: HashMap<String, String>,
    pub series_id: Option<ItemId>,
    pub series_name: Option<String>,
    pub season_id: Option<ItemId>,
    pub parent_index_number: Option<u32>,
    pub index_number: Option<u32>,
    pub index_number_end: Option<u32>,
    pub tags: Vec<String>,
    pub overview: Option<String>,
    pub user_data: UserData,
}

impl Default for ItemId {
    fn default() -> Self {
        Self(String::new())
    }
}

impl MediaItem {
    /// Season/episode numbers of an episode item
    pub fn episode_position(&self) -> Option<EpisodePosition> {
        if self.kind != ItemKind::Episode {
            return None;
        }
        Some(EpisodePosition {
            season: self.parent_index_number?,
            episode: self.index_number?,
            episode_end: self.index_number_end,
        })
    }

    pub fn episode_watch(&self) -> Option<EpisodeWatch> {
        self.episode_position().map(|position| EpisodeWatch {
            position,
            played: self.user_data.played,
        })
    }
}
