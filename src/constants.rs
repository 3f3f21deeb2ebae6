//! Application-wide constants
//!
//! Selectors, attribute names, delays and keyword tables used throughout
//! the protection engine, providing a single source of truth for them.

/// Config file location
pub mod config {
    /// Directory under the platform config dir
    pub const APP_DIR: &str = "spoiler-guard";

    /// Config file name
    pub const FILENAME: &str = "config.json";
}

/// Bounds applied by `Settings::validate_and_clamp`
pub mod validation {
    /// Shortest reveal window in milliseconds
    pub const MIN_REVEAL_MS: u64 = 250;

    /// Longest reveal window in milliseconds
    pub const MAX_REVEAL_MS: u64 = 60_000;
}

/// Class names and attributes the host client renders
pub mod host {
    /// Grid card
    pub const CARD_CLASS: &str = "card";

    /// List row (episode lists, search rows)
    pub const LIST_ITEM_CLASS: &str = "listItem";

    /// Card artwork container
    pub const CARD_IMAGE_CLASS: &str = "cardImageContainer";

    /// List row artwork
    pub const LIST_ITEM_IMAGE_CLASS: &str = "listItemImage";

    /// Card title/subtitle lines
    pub const CARD_TEXT_CLASS: &str = "cardText";

    /// List row title/subtitle lines
    pub const LIST_ITEM_TEXT_CLASS: &str = "listItemBodyText";

    /// List row overview paragraph
    pub const LIST_ITEM_OVERVIEW_CLASS: &str = "listItemOverview";

    /// Home/search/library section wrapper
    pub const SECTION_CLASS: &str = "verticalSection";

    /// Section heading
    pub const SECTION_TITLE_CLASS: &str = "sectionTitle";

    /// Detail page root
    pub const DETAIL_PAGE_CLASS: &str = "itemDetailPage";

    /// Detail page title
    pub const ITEM_NAME_CLASS: &str = "itemName";

    /// Detail page overview
    pub const OVERVIEW_CLASS: &str = "overview";

    /// Detail page backdrop
    pub const BACKDROP_CLASS: &str = "backdropImage";

    /// Detail page poster
    pub const POSTER_CLASS: &str = "detailImageContainer";

    /// Detail page misc info line (runtime, air date, rating)
    pub const MISC_INFO_CLASS: &str = "itemMiscInfo";

    /// Guest star cast section
    pub const GUEST_STARS_CLASS: &str = "guestCastContent";

    /// Chapter card (detail page and OSD)
    pub const CHAPTER_CARD_CLASS: &str = "chapterCard";

    /// Chapter name inside a chapter card
    pub const CHAPTER_NAME_CLASS: &str = "chapterCardText";

    /// Chapter thumbnail inside a chapter card
    pub const CHAPTER_THUMB_CLASS: &str = "chapterCardImage";

    /// Player overlay root
    pub const OSD_CLASS: &str = "videoOsdBottom";

    /// Player overlay title
    pub const OSD_TITLE_CLASS: &str = "osdTitle";

    /// Item id carried by cards, detail roots and the OSD
    pub const DATA_ID: &str = "data-id";

    /// Item type carried by cards
    pub const DATA_TYPE: &str = "data-type";

    /// Parent series id carried by some episode cards
    pub const DATA_SERIES_ID: &str = "data-seriesid";

    /// Chapter start position in ticks
    pub const DATA_POSITION_TICKS: &str = "data-positionticks";
}

/// Classes and attributes this crate writes
pub mod marker {
    /// Card processing marker (`processed` / `scanned`)
    pub const STATE_ATTR: &str = "data-spoiler-state";

    /// Marker value set on first visit
    pub const STATE_PROCESSED: &str = "processed";

    /// Marker value set on completion
    pub const STATE_SCANNED: &str = "scanned";

    /// Detail page elements touched during the current navigation
    pub const DETAIL_ATTR: &str = "data-spoiler-detail";

    /// Original text kept for reveal
    pub const ORIGINAL_TEXT_ATTR: &str = "data-spoiler-original";

    /// Set on episode elements past the watch boundary
    pub const PAST_BOUNDARY_ATTR: &str = "data-spoiler-past-boundary";

    /// Blurred artwork
    pub const BLUR_CLASS: &str = "spoiler-blur";

    /// Artwork replaced with a generic placeholder
    pub const GENERIC_CLASS: &str = "spoiler-generic";

    /// Text replaced with a safe label
    pub const TEXT_CLASS: &str = "spoiler-text";

    /// Hidden block (overview, guest stars)
    pub const HIDDEN_CLASS: &str = "spoiler-hidden";

    /// Element that accepts a click to reveal
    pub const REVEALABLE_CLASS: &str = "spoiler-revealable";

    /// Element currently revealed by the user
    pub const REVEALED_CLASS: &str = "spoiler-revealed";

    /// Protection toggle button injected on detail pages
    pub const TOGGLE_BUTTON_CLASS: &str = "spoiler-toggle";
}

/// Timing constants (milliseconds)
pub mod timing {
    /// Card rescan debounce
    pub const CARD_DEBOUNCE_MS: u64 = 100;

    /// Detail rescan debounce
    pub const DETAIL_DEBOUNCE_MS: u64 = 150;

    /// Overlay rescan debounce
    pub const OSD_DEBOUNCE_MS: u64 = 150;

    /// First detail pass after navigation
    pub const DETAIL_SHORT_PASS_MS: u64 = 300;

    /// Second detail pass after navigation, catches the late episode list
    pub const DETAIL_LONG_PASS_MS: u64 = 1_500;

    /// Default reveal window
    pub const DEFAULT_REVEAL_MS: u64 = 10_000;
}

/// Media playback units
pub mod ticks {
    /// Ticks per second (100ns units)
    pub const PER_SECOND: i64 = 10_000_000;
}

/// Location tokens for page classification, in match order
pub mod routes {
    pub const PLAYER: &[&str] = &["/video", "nowplaying", "videoosd"];
    pub const CALENDAR: &[&str] = &["calendar"];
    pub const SEARCH: &[&str] = &["search"];
    pub const DETAIL: &[&str] = &["details", "item?"];
    pub const HOME: &[&str] = &["home"];
    pub const LIBRARY: &[&str] = &["list", "movies", "tv", "collections"];
}

/// Section heading keywords, lowercase
pub mod headings {
    pub const RECENTLY_ADDED: &[&str] = &["recently added", "latest"];
    pub const HOME: &[&str] = &["continue watching", "next up"];
    pub const SEARCH: &[&str] = &["search"];
}

/// Translation keys and English fallbacks
pub mod text {
    pub const EPISODE_KEY: &str = "spoiler_episode_label";
    pub const SPECIAL_KEY: &str = "spoiler_special_label";
    pub const SPECIAL_FALLBACK: &str = "Special";
    pub const CHAPTER_KEY: &str = "spoiler_chapter_label";
    pub const CHAPTER_FALLBACK: &str = "Chapter";
    pub const HIDDEN_TITLE_KEY: &str = "spoiler_hidden_title";
    pub const HIDDEN_TITLE_FALLBACK: &str = "Spoiler hidden";
    pub const SEASON_KEY: &str = "spoiler_season_label";
    pub const SEASON_FALLBACK: &str = "Season";
    pub const AUTO_ENABLED_KEY: &str = "spoiler_auto_enabled";
    pub const AUTO_ENABLED_FALLBACK: &str = "Spoiler protection enabled for";
    pub const TOGGLE_ON_KEY: &str = "spoiler_toggle_on";
    pub const TOGGLE_ON_FALLBACK: &str = "Spoiler protection on";
    pub const TOGGLE_OFF_KEY: &str = "spoiler_toggle_off";
    pub const TOGGLE_OFF_FALLBACK: &str = "Spoiler protection off";
}
