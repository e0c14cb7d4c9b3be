//! In-memory remote and local stores, for embedding and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::backup::Backup;
use super::config::ResolvedConfig;
use super::history::HistoryRecord;
use super::remote::{RemoteConnector, RemoteStore};
use super::store::{BackupStore, HistoryStore, SettingsStore, StoreError};
use super::webdav::{ResourceInfo, WebDAVError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    offline: bool,
    refuse_directories: bool,
    latency: Duration,
    writes: usize,
}

/// Remote store backed by a map of URL to bytes.
///
/// Clones share the same state, so a test can keep one handle while the sync
/// manager connects through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with a connection-refused error
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Answer directory creation with 403, like stores that only auto-create on write
    pub fn refuse_directories(&self, refuse: bool) {
        lock(&self.state).refuse_directories = refuse;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    pub fn put_file(&self, url: &str, data: impl Into<Vec<u8>>) {
        lock(&self.state).files.insert(url.to_string(), data.into());
    }

    pub fn file(&self, url: &str) -> Option<Vec<u8>> {
        lock(&self.state).files.get(url).cloned()
    }

    pub fn has_directory(&self, url: &str) -> bool {
        lock(&self.state).dirs.contains(url)
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        lock(&self.state).writes
    }

    async fn enter(&self) -> Result<(), WebDAVError> {
        let (offline, latency) = {
            let state = lock(&self.state);
            (state.offline, state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if offline {
            return Err(WebDAVError::Io(std::io::Error::new(
                ErrorKind::ConnectionRefused,
                "remote is offline",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn exists(&self, url: &str) -> Result<bool, WebDAVError> {
        self.enter().await?;
        let state = lock(&self.state);
        Ok(state.files.contains_key(url) || state.dirs.contains(url))
    }

    async fn read(&self, url: &str) -> Result<Vec<u8>, WebDAVError> {
        self.enter().await?;
        lock(&self.state)
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| WebDAVError::NotFound(url.to_string()))
    }

    async fn write(&self, url: &str, data: &[u8]) -> Result<(), WebDAVError> {
        self.enter().await?;
        let mut state = lock(&self.state);
        state.files.insert(url.to_string(), data.to_vec());
        state.writes += 1;
        Ok(())
    }

    async fn ensure_directory(&self, url: &str) -> Result<(), WebDAVError> {
        self.enter().await?;
        let mut state = lock(&self.state);
        if state.refuse_directories {
            return Err(WebDAVError::Forbidden(url.to_string()));
        }
        state.dirs.insert(url.to_string());
        Ok(())
    }

    async fn list(&self, url: &str) -> Result<Vec<ResourceInfo>, WebDAVError> {
        self.enter().await?;
        let state = lock(&self.state);
        Ok(state
            .files
            .iter()
            .filter_map(|(path, data)| {
                let name = path.strip_prefix(url)?;
                Some(ResourceInfo {
                    path: name.to_string(),
                    is_collection: false,
                    etag: None,
                    last_modified: None,
                    content_length: Some(data.len() as u64),
                })
            })
            .collect())
    }
}

impl RemoteConnector for MemoryRemote {
    fn connect(&self, _config: &ResolvedConfig) -> Result<Arc<dyn RemoteStore>, WebDAVError> {
        Ok(Arc::new(self.clone()))
    }
}

/// History store keyed by record key, in insertion order
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new(records: Vec<HistoryRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn find(&self, key: &str) -> Option<HistoryRecord> {
        lock(&self.records).iter().find(|r| r.key == key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn list_all(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        Ok(lock(&self.records).clone())
    }

    fn insert(&self, records: &[HistoryRecord]) -> Result<(), StoreError> {
        let mut stored = lock(&self.records);
        for record in records {
            match stored.iter_mut().find(|r| r.key == record.key) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    fn update(&self, records: &[HistoryRecord]) -> Result<(), StoreError> {
        let mut stored = lock(&self.records);
        for record in records {
            if let Some(existing) = stored.iter_mut().find(|r| r.key == record.key) {
                *existing = record.clone();
            }
        }
        Ok(())
    }

    fn replace(&self, old_key: &str, record: &HistoryRecord) -> Result<(), StoreError> {
        let mut stored = lock(&self.records);
        if old_key != record.key {
            stored.retain(|r| r.key != record.key);
        }
        if let Some(existing) = stored.iter_mut().find(|r| r.key == old_key) {
            *existing = record.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<Map<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn all(&self) -> Result<Map<String, Value>, StoreError> {
        Ok(lock(&self.values).clone())
    }

    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }
}

/// Backup store that snapshots a fixed value and records restores
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    current: Mutex<Backup>,
    restored: Mutex<Vec<Backup>>,
}

impl MemoryBackupStore {
    pub fn new(current: Backup) -> Self {
        Self {
            current: Mutex::new(current),
            restored: Mutex::new(Vec::new()),
        }
    }

    pub fn restored(&self) -> Vec<Backup> {
        lock(&self.restored).clone()
    }
}

impl BackupStore for MemoryBackupStore {
    fn create(&self) -> Result<Backup, StoreError> {
        Ok(lock(&self.current).clone())
    }

    fn restore(&self, backup: Backup) -> Result<(), StoreError> {
        *lock(&self.current) = backup.clone();
        lock(&self.restored).push(backup);
        Ok(())
    }
}
