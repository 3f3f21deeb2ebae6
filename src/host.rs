//! Host-side collaborators: toast notifications and translation lookup

use std::cell::RefCell;
use std::collections::HashMap;
use tracing::info;

pub trait Host {
    /// Show a short user-facing notification
    fn toast(&self, message: &str);

    /// Translated string for `key`, or `fallback` when no translation exists
    fn t_fallback(&self, key: &str, fallback: &str) -> String;
}

/// Host for headless runs: toasts go to the log, translations come from a
/// fixed table
#[derive(Debug, Default)]
pub struct LogHost {
    translations: HashMap<String, String>,
    toasts: RefCell<Vec<String>>,
}

impl LogHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translations(translations: HashMap<String, String>) -> Self {
        Self {
            translations,
            toasts: RefCell::new(Vec::new()),
        }
    }

    /// Toasts shown so far
    pub fn toasts(&self) -> Vec<String> {
        self.toasts.borrow().clone()
    }
}

impl Host for LogHost {
    fn toast(&self, message: &str) {
        info!(message = %message, "Toast");
        self.toasts.borrow_mut().push(message.to_string());
    }

    fn t_fallback(&self, key: &str, fallback: &str) -> String {
        self.translations
            .get(key)
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }
}
