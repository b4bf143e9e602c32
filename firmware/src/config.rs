//! Runtime tunables.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const SETTINGS_FILE: &str = "settings.json";

/// Timing and sizing knobs. Every field has a default, so a partial
/// `settings.json` (or none at all) is fine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Cadence of the key and encoder tasks and of the main-loop tick.
    pub scan_ms: u64,
    /// Minimum interval between two accepted transitions of one matrix cell.
    pub debounce_ms: u64,
    /// Row-drive stabilization wait before reading columns.
    pub settle_us: u32,
    /// Default wait between macro commands.
    pub macro_pacing_ms: u64,
    /// Auto-release delay for consumer presses and encoder taps.
    pub tap_release_ms: u64,
    /// Capacity of the event queue feeding the dispatcher.
    pub event_queue: usize,
    /// Period of the encoder state dump; 0 disables it.
    pub diagnostics_interval_ms: u64,
    /// Columns read high when a key is down (pull-down wiring).
    pub active_high: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_ms: 10,
            debounce_ms: 50,
            settle_us: 50,
            macro_pacing_ms: 50,
            tap_release_ms: 20,
            event_queue: 64,
            diagnostics_interval_ms: 5000,
            active_high: false,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read `settings.json` from a configuration directory, falling back to
    /// defaults when the file does not exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if !path.is_file() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let json = fs::read_to_string(&path).map_err(|source| Error::Storage { path, source })?;
        Self::from_json(&json)
    }
}
