//! Configuration management for spoiler-guard
//!
//! - **settings**: feature toggles and policy knobs
//! - **persistent**: the on-disk config file (settings + protection rules)

pub mod persistent;
pub mod settings;

// Re-export commonly used types
pub use persistent::{Config, JsonRuleStore};
pub use settings::{ArtworkPolicy, Settings};
