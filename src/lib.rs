#![forbid(unsafe_code)]

//! Spoiler protection engine for a media-browsing web client
//!
//! Hides titles, artwork, overviews and chapter markers of media the user
//! has not watched yet, across every surface of the client. The host
//! integration owns the page; it mirrors renders into a [`dom::Document`],
//! publishes navigation on a [`navigation::NavigationBus`], and lets a
//! [`engine::SpoilerEngine`] redact what it observes.

pub mod auto_enable;
pub mod boundary;
pub mod calendar;
pub mod card;
pub mod config;
pub mod constants;
pub mod detail;
pub mod dom;
pub mod engine;
pub mod host;
pub mod navigation;
pub mod overlay;
pub mod redaction;
pub mod registry;
pub mod router;
pub mod source;
pub mod surface;
pub mod types;

pub use engine::{SpoilerEngine, ToggleOutcome};
