//! Surface classification: which logical area of the client an element
//! belongs to, and whether that area is protected

use std::collections::HashMap;
use std::fmt;

use crate::config::Settings;
use crate::constants::{headings, host, routes};
use crate::dom::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Surface {
    Home,
    Search,
    Detail,
    Player,
    Library,
    RecentlyAdded,
    Calendar,
    None,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Home => "home",
            Surface::Search => "search",
            Surface::Detail => "detail",
            Surface::Player => "player",
            Surface::Library => "library",
            Surface::RecentlyAdded => "recentlyAdded",
            Surface::Calendar => "calendar",
            Surface::None => "",
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Page-level surface from the navigation location. First match wins:
/// player, calendar, search, detail, home, library.
pub fn classify_location(location: &str) -> Surface {
    let location = location.trim().to_lowercase();
    if contains_any(&location, routes::PLAYER) {
        Surface::Player
    } else if contains_any(&location, routes::CALENDAR) {
        Surface::Calendar
    } else if contains_any(&location, routes::SEARCH) {
        Surface::Search
    } else if contains_any(&location, routes::DETAIL) {
        Surface::Detail
    } else if contains_any(&location, routes::HOME) || matches!(location.as_str(), "" | "#" | "#/" | "/") {
        Surface::Home
    } else if contains_any(&location, routes::LIBRARY) {
        Surface::Library
    } else {
        Surface::None
    }
}

/// Section element → surface memo. Cleared on navigation, rule changes and
/// settings changes.
#[derive(Debug, Default)]
pub struct SurfaceCache {
    sections: HashMap<NodeId, Surface>,
}

impl SurfaceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.sections.clear();
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Surface of a card: its section heading decides when it names one,
/// otherwise the page surface applies
pub fn card_surface(doc: &Document, card: NodeId, page: Surface, cache: &mut SurfaceCache) -> Surface {
    let Some(section) = doc.closest(card, |d, n| d.has_class(n, host::SECTION_CLASS)) else {
        return page;
    };
    if let Some(surface) = cache.sections.get(&section) {
        return *surface;
    }

    let heading = doc
        .find_by_class(section, host::SECTION_TITLE_CLASS)
        .map(|h| doc.text_content(h).to_lowercase())
        .unwrap_or_default();
    let surface = if contains_any(&heading, headings::RECENTLY_ADDED) {
        Surface::RecentlyAdded
    } else if contains_any(&heading, headings::HOME) {
        Surface::Home
    } else if contains_any(&heading, headings::SEARCH) {
        Surface::Search
    } else {
        page
    };
    cache.sections.insert(section, surface);
    surface
}

/// Detail and library are always protected while the feature is on
pub fn should_protect_surface(surface: Surface, settings: &Settings) -> bool {
    if !settings.enabled {
        return false;
    }
    match surface {
        Surface::Detail | Surface::Library => true,
        Surface::Home => settings.protect_home,
        Surface::Search => settings.protect_search,
        Surface::RecentlyAdded => settings.protect_recently_added,
        Surface::Player => settings.protect_overlay,
        Surface::Calendar => settings.protect_calendar,
        Surface::None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementSpec;

    #[test]
    fn test_classify_location_order() {
        assert_eq!(classify_location("#/video?id=1"), Surface::Player);
        // Player tokens win over search
        assert_eq!(classify_location("#/search?q=videoosd"), Surface::Player);
        assert_eq!(classify_location("#/search.html?query=abc"), Surface::Search);
        assert_eq!(classify_location("#/details?id=abc"), Surface::Detail);
        assert_eq!(classify_location("#/home.html"), Surface::Home);
        assert_eq!(classify_location("#/"), Surface::Home);
        assert_eq!(classify_location("#/tv.html?topParentId=1"), Surface::Library);
        assert_eq!(classify_location("#/calendar"), Surface::Calendar);
        assert_eq!(classify_location("#/dashboard"), Surface::None);
    }

    fn section(title: &str) -> ElementSpec {
        ElementSpec::new("div")
            .class(host::SECTION_CLASS)
            .child(ElementSpec::new("h2").class(host::SECTION_TITLE_CLASS).text(title))
            .child(ElementSpec::new("div").class(host::CARD_CLASS).attr(host::DATA_ID, "x"))
    }

    fn card_in(doc: &mut Document, title: &str) -> NodeId {
        let body = doc.body();
        let section = doc.insert(body, &section(title));
        doc.find_by_class(section, host::CARD_CLASS).unwrap()
    }

    #[test]
    fn test_card_surface_from_heading() {
        let mut doc = Document::new();
        let mut cache = SurfaceCache::new();

        let latest = card_in(&mut doc, "Latest Movies");
        let cont = card_in(&mut doc, "Continue Watching");
        let search = card_in(&mut doc, "Search Results");
        let other = card_in(&mut doc, "My Media");

        assert_eq!(card_surface(&doc, latest, Surface::Home, &mut cache), Surface::RecentlyAdded);
        assert_eq!(card_surface(&doc, cont, Surface::Library, &mut cache), Surface::Home);
        assert_eq!(card_surface(&doc, search, Surface::Home, &mut cache), Surface::Search);
        assert_eq!(card_surface(&doc, other, Surface::Library, &mut cache), Surface::Library);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_card_surface_without_section_uses_page() {
        let mut doc = Document::new();
        let body = doc.body();
        let card = doc.insert(body, &ElementSpec::new("div").class(host::CARD_CLASS));
        let mut cache = SurfaceCache::new();
        assert_eq!(card_surface(&doc, card, Surface::Search, &mut cache), Surface::Search);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_card_surface_memoized_per_section() {
        let mut doc = Document::new();
        let mut cache = SurfaceCache::new();
        let card = card_in(&mut doc, "Next Up");
        assert_eq!(card_surface(&doc, card, Surface::Library, &mut cache), Surface::Home);

        // Heading edits are not seen until the cache is cleared
        let section = doc.parent(card).unwrap();
        let heading = doc.find_by_class(section, host::SECTION_TITLE_CLASS).unwrap();
        doc.set_text(heading, "Latest");
        assert_eq!(card_surface(&doc, card, Surface::Library, &mut cache), Surface::Home);

        cache.clear();
        assert_eq!(card_surface(&doc, card, Surface::Library, &mut cache), Surface::RecentlyAdded);
    }

    #[test]
    fn test_should_protect_surface_gates() {
        let mut settings = Settings {
            protect_search: false,
            protect_home: true,
            ..Settings::default()
        };
        assert!(!should_protect_surface(Surface::Search, &settings));
        assert!(should_protect_surface(Surface::Home, &settings));
        assert!(should_protect_surface(Surface::Detail, &settings));
        assert!(!should_protect_surface(Surface::None, &settings));

        settings.enabled = false;
        assert!(!should_protect_surface(Surface::Detail, &settings));
        assert!(!should_protect_surface(Surface::Library, &settings));
    }
}
