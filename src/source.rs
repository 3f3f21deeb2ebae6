//! Media source collaborator: item lookup, watch state and collections
//!
//! The engine never talks to the network itself; everything goes through
//! [`MediaSource`]. [`JsonLibrary`] is a file-backed implementation used by
//! the CLI and the tests.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::types::{ItemId, ItemKind, MediaItem};

/// Fields requested from the item endpoint
pub mod fields {
    pub const BASIC: &[&str] = &["Type", "SeriesId", "ParentIndexNumber", "IndexNumber", "IndexNumberEnd"];
    pub const WATCH: &[&str] = &["UserData"];
    pub const FULL: &[&str] = &[
        "Type",
        "ProviderIds",
        "SeriesId",
        "ParentIndexNumber",
        "IndexNumber",
        "IndexNumberEnd",
        "Tags",
        "Overview",
        "UserData",
    ];
}

#[allow(async_fn_in_trait)]
pub trait MediaSource {
    /// Fetch one item by id
    async fn get_item(&self, id: &ItemId, fields: &[&str]) -> Result<MediaItem>;

    /// Every episode of a series, with user data
    async fn episodes(&self, series_id: &ItemId) -> Result<Vec<MediaItem>>;

    /// Box sets containing the movie
    async fn collections_for_movie(&self, movie_id: &ItemId) -> Result<Vec<ItemId>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LibraryFile {
    items: Vec<MediaItem>,
    /// Box set id → member movie ids
    collections: HashMap<ItemId, Vec<ItemId>>,
}

/// In-memory library loaded from JSON
#[derive(Debug, Default)]
pub struct JsonLibrary {
    items: HashMap<ItemId, MediaItem>,
    collections: HashMap<ItemId, Vec<ItemId>>,
    item_fetches: Cell<usize>,
    failing: RefCell<HashSet<ItemId>>,
    /// Artificial delay per lookup
    latency: Cell<Option<Duration>>,
}

impl JsonLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read library file {}", path.display()))?;
        Self::from_json(&contents).with_context(|| format!("Failed to parse library file {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: LibraryFile = serde_json::from_str(json).context("Invalid library JSON")?;
        let mut library = Self::new();
        for item in file.items {
            library.add_item(item);
        }
        library.collections = file.collections;
        Ok(library)
    }

    pub fn add_item(&mut self, item: MediaItem) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn add_to_collection(&mut self, boxset: ItemId, movie: ItemId) {
        self.collections.entry(boxset).or_default().push(movie);
    }

    pub fn item_mut(&mut self, id: &ItemId) -> Option<&mut MediaItem> {
        self.items.get_mut(id)
    }

    /// Number of `get_item` calls served so far
    pub fn item_fetches(&self) -> usize {
        self.item_fetches.get()
    }

    /// Make lookups of `id` fail, simulating a transport error
    pub fn fail_item(&self, id: &ItemId) {
        self.failing.borrow_mut().insert(id.clone());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency.set(Some(latency));
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency.get() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl MediaSource for JsonLibrary {
    async fn get_item(&self, id: &ItemId, fields: &[&str]) -> Result<MediaItem> {
        self.item_fetches.set(self.item_fetches.get() + 1);
        debug!(item = %id, fields = ?fields, "Fetching item");
        self.delay().await;
        if self.failing.borrow().contains(id) {
            return Err(anyhow!("transport error fetching {id}"));
        }
        self.items
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("item {id} not found"))
    }

    async fn episodes(&self, series_id: &ItemId) -> Result<Vec<MediaItem>> {
        self.delay().await;
        if self.failing.borrow().contains(series_id) {
            return Err(anyhow!("transport error listing episodes of {series_id}"));
        }
        Ok(self
            .items
            .values()
            .filter(|item| item.kind == ItemKind::Episode && item.series_id.as_ref() == Some(series_id))
            .cloned()
            .collect())
    }

    async fn collections_for_movie(&self, movie_id: &ItemId) -> Result<Vec<ItemId>> {
        let mut found: Vec<ItemId> = self
            .collections
            .iter()
            .filter(|(_, members)| members.contains(movie_id))
            .map(|(boxset, _)| boxset.clone())
            .collect();
        found.sort();
        Ok(found)
    }
}
