//! Durable snapshot of selected state keys

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};
use tracing::debug;

use super::messages::StateResponse;

/// Where persisted keys live between sessions
pub trait SnapshotStore: Send + Sync + fmt::Debug {
    /// Read the whole snapshot; an absent snapshot is empty
    fn load(&self) -> StateResponse<Map<String, Value>>;

    /// Replace the whole snapshot
    fn save(&self, snapshot: &Map<String, Value>) -> StateResponse<()>;

    /// Merge one key into the snapshot
    fn merge(&self, key: &str, value: &Value) -> StateResponse<()> {
        let mut snapshot = self.load()?;
        snapshot.insert(key.to_string(), value.clone());
        self.save(&snapshot)
    }

    /// Drop one key from the snapshot
    fn remove(&self, key: &str) -> StateResponse<()> {
        let mut snapshot = self.load()?;
        if snapshot.remove(key).is_some() {
            self.save(&snapshot)?;
        }
        Ok(())
    }
}

/// JSON object in a file, rewritten atomically via a sibling temp file
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    path: PathBuf,
}

impl FileSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for FileSnapshot {
    fn load(&self) -> StateResponse<Map<String, Value>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "FileSnapshot::load: no snapshot yet");
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        let snapshot: Map<String, Value> = serde_json::from_str(&content)?;
        debug!(path = %self.path.display(), keys = snapshot.len(), "FileSnapshot::load");
        Ok(snapshot)
    }

    fn save(&self, snapshot: &Map<String, Value>) -> StateResponse<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(snapshot)?;
        let temp = self.temp_path();
        fs::write(&temp, content)?;
        fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), keys = snapshot.len(), "FileSnapshot::save");
        Ok(())
    }
}

/// In-process snapshot for tests and sessions without a persist path
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    snapshot: Mutex<Map<String, Value>>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(snapshot: Map<String, Value>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }
}

impl SnapshotStore for MemorySnapshot {
    fn load(&self) -> StateResponse<Map<String, Value>> {
        Ok(self.snapshot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, snapshot: &Map<String, Value>) -> StateResponse<()> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        Ok(())
    }
}
