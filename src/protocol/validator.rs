//! Process-wide UTF-8 strictness toggle for text messages.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared by every codec; flipping it affects all connections at once.
#[derive(Debug)]
pub struct Utf8Validator {
    enabled: AtomicBool,
}

impl Utf8Validator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn a text payload into a string.
    ///
    /// With checks off, invalid sequences are replaced instead of rejected.
    pub fn text(&self, payload: &[u8]) -> Option<String> {
        match std::str::from_utf8(payload) {
            Ok(text) => Some(text.to_string()),
            Err(_) if self.is_enabled() => None,
            Err(_) => Some(String::from_utf8_lossy(payload).into_owned()),
        }
    }
}

impl Default for Utf8Validator {
    fn default() -> Self {
        Self::new(true)
    }
}
