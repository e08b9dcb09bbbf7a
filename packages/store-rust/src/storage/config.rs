//! Configuration for the cache engine.

use std::time::Duration;

use preset_store_core::key::{DEFAULT_OPTION_PREFIX, DEFAULT_PRESET};

/// Engine-level configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Quiet period after the last write before pending writes are flushed.
    /// One timer is shared by every key.
    pub debounce: Duration,
    /// First segment of every option key (`prefix.preset.name`).
    pub option_prefix: String,
    /// Preset active until the first switch.
    pub initial_preset: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            option_prefix: DEFAULT_OPTION_PREFIX.to_string(),
            initial_preset: DEFAULT_PRESET.to_string(),
        }
    }
}

impl StoreConfig {
    /// Default configuration with a different debounce interval.
    #[must_use]
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            debounce,
            ..Self::default()
        }
    }
}
