//! Stable storage for the current-layer selection.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Name of the blob holding the last active layer.
pub const CURRENT_LAYER_KEY: &str = "current_layer";

pub trait LayerStore: Send {
    /// The saved layer name, if one was ever saved.
    fn load(&self) -> Result<Option<String>>;
    fn save(&mut self, layer: &str) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct LayerBlob {
    current_layer: String,
}

/// `current_layer.json` in the configuration directory.
#[derive(Debug, Clone)]
pub struct FileLayerStore {
    path: PathBuf,
}

impl FileLayerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(format!("{}.json", CURRENT_LAYER_KEY)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(&self, source: io::Error) -> Error {
        Error::Storage {
            path: self.path.clone(),
            source,
        }
    }
}

impl LayerStore for FileLayerStore {
    fn load(&self) -> Result<Option<String>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.storage_error(e)),
        };
        match serde_json::from_str::<LayerBlob>(&json) {
            Ok(blob) => Ok(Some(blob.current_layer)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable layer state, ignored");
                Ok(None)
            }
        }
    }

    fn save(&mut self, layer: &str) -> Result<()> {
        let blob = LayerBlob {
            current_layer: layer.to_string(),
        };
        let json = serde_json::to_string(&blob)?;
        // Write-then-rename so a reset mid-write leaves the old blob intact.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.storage_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.storage_error(e))
    }
}

#[derive(Debug, Default)]
struct MemoryBlob {
    value: Option<String>,
    writes: usize,
    failing: bool,
}

/// In-memory store. Clones share the same blob, so a test can keep a handle
/// after handing the store to the core.
#[derive(Debug, Clone, Default)]
pub struct MemoryLayerStore {
    inner: Arc<Mutex<MemoryBlob>>,
}

impl MemoryLayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(layer: &str) -> Self {
        let store = Self::new();
        store.inner.lock().value = Some(layer.to_string());
        store
    }

    pub fn value(&self) -> Option<String> {
        self.inner.lock().value.clone()
    }

    /// Number of successful saves.
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }
}

impl LayerStore for MemoryLayerStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.value())
    }

    fn save(&mut self, layer: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.failing {
            return Err(Error::Storage {
                path: PathBuf::from(CURRENT_LAYER_KEY),
                source: io::Error::other("store unavailable"),
            });
        }
        inner.value = Some(layer.to_string());
        inner.writes += 1;
        Ok(())
    }
}
