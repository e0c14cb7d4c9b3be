//! Local collaborators the sync engine reads from and writes to.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::{Map, Value};
use thiserror::Error;

use super::backup::Backup;
use super::history::HistoryRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store error: {0}")]
    Backend(String),
}

/// Device-local watch history
pub trait HistoryStore: Send + Sync {
    /// Every record, including those outside the retention window
    fn list_all(&self) -> Result<Vec<HistoryRecord>, StoreError>;
    fn insert(&self, records: &[HistoryRecord]) -> Result<(), StoreError>;
    /// Replace records that share a key with the given ones
    fn update(&self, records: &[HistoryRecord]) -> Result<(), StoreError>;
    /// Replace the record stored under `old_key` with `record`, which may carry a new key.
    /// Any other record already stored under the new key is dropped.
    fn replace(&self, old_key: &str, record: &HistoryRecord) -> Result<(), StoreError>;
}

/// Flat app preferences map
pub trait SettingsStore: Send + Sync {
    fn all(&self) -> Result<Map<String, Value>, StoreError>;
    fn get(&self, key: &str) -> Option<Value>;
    fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Full-state snapshot source and sink
pub trait BackupStore: Send + Sync {
    fn create(&self) -> Result<Backup, StoreError>;
    fn restore(&self, backup: Backup) -> Result<(), StoreError>;
}

/// Settings persisted as a single JSON object on disk
pub struct JsonSettingsFile {
    path: PathBuf,
    values: RwLock<Map<String, Value>>,
}

impl JsonSettingsFile {
    /// Open the file, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            if data.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&data)?
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsFile {
    fn all(&self) -> Result<Map<String, Value>, StoreError> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values.clone())
    }

    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        let mut next = values.clone();
        next.insert(key.to_string(), value);
        self.save(&next)?;
        *values = next;
        Ok(())
    }
}
