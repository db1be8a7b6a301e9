//! Runtime tuning knobs, loaded from environment variables.

use std::time::Duration;

use crate::consts::{FOCUS_SCENE_WAIT_MS, MAIN_VIEW_SIZE_DEBOUNCE_MS, SET_SCENE_PATH_DELAY_MS};

/// Timings for deferred view transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Settle delay before a writable-mode switch commits.
    pub settle_delay: Duration,
    /// Trailing debounce for main-view size replication.
    pub size_debounce: Duration,
    /// Wait between focusing a box and setting its scene path.
    pub focus_scene_wait: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(SET_SCENE_PATH_DELAY_MS),
            size_debounce: Duration::from_millis(MAIN_VIEW_SIZE_DEBOUNCE_MS),
            focus_scene_wait: Duration::from_millis(FOCUS_SCENE_WAIT_MS),
        }
    }
}

impl SyncConfig {
    /// Build config from environment variables, falling back to defaults.
    ///
    /// - `BOARDSYNC_SETTLE_DELAY_MS`: default 100
    /// - `BOARDSYNC_SIZE_DEBOUNCE_MS`: default 200
    /// - `BOARDSYNC_FOCUS_SCENE_WAIT_MS`: default 50
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            settle_delay: Duration::from_millis(env_parse("BOARDSYNC_SETTLE_DELAY_MS", SET_SCENE_PATH_DELAY_MS)),
            size_debounce: Duration::from_millis(env_parse("BOARDSYNC_SIZE_DEBOUNCE_MS", MAIN_VIEW_SIZE_DEBOUNCE_MS)),
            focus_scene_wait: Duration::from_millis(env_parse("BOARDSYNC_FOCUS_SCENE_WAIT_MS", FOCUS_SCENE_WAIT_MS)),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
