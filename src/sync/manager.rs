use std::future::Future;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::backup::Backup;
use super::config::{ResolvedConfig, SyncMode, SyncOptions, SyncSettings, TestResult};
use super::encoding::repair_record;
use super::guard::SingleFlight;
use super::history::{retention_cutoff, HistoryRecord};
use super::reconcile::reconcile_with;
use super::remote::{ConnectionFailure, RemoteConnector, RemoteStore, WebDAVConnector};
use super::settings::{SettingDecision, SettingsRegistry};
use super::store::{BackupStore, HistoryStore, SettingsStore, StoreError};
use super::webdav::WebDAVError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("WebDAV error: {0}")]
    WebDAV(#[from] WebDAVError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Sync not configured")]
    NotConfigured,
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Upload not visible on the remote: {0}")]
    Unverified(String),
}

/// How a composite sync runs relative to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run to completion before returning
    Inline,
    /// Spawn onto the current tokio runtime and return a handle.
    /// Rejected when called outside a runtime.
    Background,
}

/// Per-step results of a composite sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub history_uploaded: bool,
    pub history_downloaded: bool,
    pub settings_uploaded: bool,
    pub settings_downloaded: bool,
}

/// A composite sync running in the background
#[derive(Debug)]
pub struct SyncHandle {
    task: JoinHandle<SyncReport>,
}

impl SyncHandle {
    /// Wait for the run to finish. `None` if the task panicked or was aborted.
    pub async fn wait(self) -> Option<SyncReport> {
        match self.task.await {
            Ok(report) => Some(report),
            Err(e) => {
                log::error!("Sync: background task failed: {}", e);
                None
            }
        }
    }
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// Not configured, a guarded run is already in flight, or no runtime for a background run
    Rejected,
    Completed(SyncReport),
    Dispatched(SyncHandle),
}

impl SyncOutcome {
    /// Whether the request was taken on
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    /// The report of an accepted run, waiting for it if it was dispatched
    pub async fn report(self) -> Option<SyncReport> {
        match self {
            Self::Rejected => None,
            Self::Completed(report) => Some(report),
            Self::Dispatched(handle) => handle.wait().await,
        }
    }
}

/// Notifications for observers such as a UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Sent after every successful history download, whether or not anything changed
    HistoryRefreshed,
    SettingsApplied { count: usize },
    BackupRestored,
}

struct Remote {
    config: ResolvedConfig,
    store: Option<Arc<dyn RemoteStore>>,
}

/// Coordinates history, settings and backup sync against one remote store.
///
/// Every public operation absorbs its errors: failures are logged and turned into
/// `false` or [`SyncOutcome::Rejected`].
pub struct SyncManager {
    settings: Arc<dyn SettingsStore>,
    history: Arc<dyn HistoryStore>,
    backup: Arc<dyn BackupStore>,
    connector: Arc<dyn RemoteConnector>,
    registry: SettingsRegistry,
    options: SyncOptions,
    remote: RwLock<Remote>,
    flight: SingleFlight,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncManager {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn HistoryStore>,
        backup: Arc<dyn BackupStore>,
        connector: Arc<dyn RemoteConnector>,
        options: SyncOptions,
    ) -> Self {
        let remote = load_remote(settings.as_ref(), connector.as_ref());
        let (events, _) = broadcast::channel(16);
        Self {
            settings,
            history,
            backup,
            connector,
            registry: SettingsRegistry::standard(),
            options,
            remote: RwLock::new(remote),
            flight: SingleFlight::new(),
            events,
        }
    }

    /// Manager that talks to real WebDAV servers
    pub fn with_webdav(
        settings: Arc<dyn SettingsStore>,
        history: Arc<dyn HistoryStore>,
        backup: Arc<dyn BackupStore>,
        options: SyncOptions,
    ) -> Self {
        Self::new(settings, history, backup, Arc::new(WebDAVConnector), options)
    }

    /// Replace the registry that decides which downloaded settings are applied
    pub fn with_registry(mut self, registry: SettingsRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Re-read the sync settings and rebuild the remote client
    pub fn reload_config(&self) {
        let remote = load_remote(self.settings.as_ref(), self.connector.as_ref());
        *self.remote.write().unwrap_or_else(|e| e.into_inner()) = remote;
    }

    /// The configuration currently in effect
    pub fn config(&self) -> ResolvedConfig {
        self.remote.read().unwrap_or_else(|e| e.into_inner()).config.clone()
    }

    pub fn is_configured(&self) -> bool {
        self.active().is_ok()
    }

    /// Whether a guarded run (history or full sync) is in flight
    pub fn is_syncing(&self) -> bool {
        self.flight.is_busy()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn active(&self) -> Result<(ResolvedConfig, Arc<dyn RemoteStore>), SyncError> {
        let remote = self.remote.read().unwrap_or_else(|e| e.into_inner());
        match &remote.store {
            Some(store) if remote.config.is_complete() => Ok((remote.config.clone(), Arc::clone(store))),
            _ => Err(SyncError::NotConfigured),
        }
    }

    fn notify(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Check that the remote directory can be listed
    pub async fn test_connection(&self) -> TestResult {
        let (config, store) = match self.active() {
            Ok(active) => active,
            Err(_) => {
                return TestResult::failed(
                    "WebDAV is not configured: fill in the server address and credentials, or a sync code.",
                )
            }
        };
        let Some(url) = config.directory_url() else {
            return TestResult::failed("WebDAV is not configured: no server address.");
        };

        match store.list(&url).await {
            Ok(entries) => {
                log::info!("WebDAV connection test to {} succeeded ({} entries)", url, entries.len());
                TestResult::ok("Connection succeeded.")
            }
            Err(e) => {
                let failure = ConnectionFailure::classify(&e);
                log::error!("WebDAV connection test to {} failed: {} ({:?})", url, e, failure);
                TestResult::failed(failure.message())
            }
        }
    }

    // ===== History =====

    pub async fn upload_history(&self) -> bool {
        match self.try_upload_history().await {
            Ok(count) => {
                log::info!("Sync: uploaded {} history records", count);
                true
            }
            Err(e) => {
                log::error!("Sync: history upload failed: {}", e);
                false
            }
        }
    }

    async fn try_upload_history(&self) -> Result<usize, SyncError> {
        let (config, store) = self.active()?;
        let url = config
            .file_url(&self.options.history_file)
            .ok_or(SyncError::NotConfigured)?;

        let mut records = self.history.list_all()?;
        for record in &mut records {
            repair_record(record);
        }
        let data = serde_json::to_vec(&records)?;

        prepare_directory(&config, store.as_ref()).await;
        store.write(&url, &data).await?;
        if !store.exists(&url).await? {
            return Err(SyncError::Unverified(url));
        }
        Ok(records.len())
    }

    pub async fn download_history(&self) -> bool {
        match self.try_download_history().await {
            Ok(done) => done,
            Err(e) => {
                log::error!("Sync: history download failed: {}", e);
                false
            }
        }
    }

    async fn try_download_history(&self) -> Result<bool, SyncError> {
        let (config, store) = self.active()?;
        let url = config
            .file_url(&self.options.history_file)
            .ok_or(SyncError::NotConfigured)?;

        if !store.exists(&url).await? {
            log::info!("Sync: no remote history at {} yet", url);
            return Ok(false);
        }
        let data = store.read(&url).await?;
        if data.iter().all(u8::is_ascii_whitespace) {
            log::info!("Sync: remote history is empty");
            return Ok(true);
        }

        let parsed: Option<Vec<Option<HistoryRecord>>> = serde_json::from_slice(&data)?;
        let mut remote: Vec<HistoryRecord> = parsed
            .ok_or_else(|| SyncError::MalformedPayload(format!("{} holds null", url)))?
            .into_iter()
            .flatten()
            .collect();

        let now = Utc::now().timestamp_millis();
        let cutoff = retention_cutoff(now, self.options.retention_days);
        for record in &mut remote {
            repair_record(record);
            if self.options.resurrect_expired && record.is_expired(cutoff) {
                log::debug!("Sync: moving expired record {} into the retention window", record.key);
                record.create_time = now;
            }
        }

        let mut local = self.history.list_all()?;
        for record in &mut local {
            let stored_key = record.key.clone();
            if repair_record(record) {
                // Persist the repair so updates keyed by the clean key find the row
                self.history.replace(&stored_key, record)?;
            }
        }

        let merged = reconcile_with(&self.options.policy, &local, &remote);
        log::info!(
            "Sync: history merge of {} remote records: {} to insert, {} to update",
            remote.len(),
            merged.to_insert.len(),
            merged.to_update.len()
        );
        if !merged.to_insert.is_empty() {
            self.history.insert(&merged.to_insert)?;
        }
        if !merged.to_update.is_empty() {
            self.history.update(&merged.to_update)?;
        }

        self.notify(SyncEvent::HistoryRefreshed);
        Ok(true)
    }

    // ===== Settings =====

    pub async fn upload_settings(&self) -> bool {
        match self.try_upload_settings().await {
            Ok(count) => {
                log::info!("Sync: uploaded {} settings", count);
                true
            }
            Err(e) => {
                log::error!("Sync: settings upload failed: {}", e);
                false
            }
        }
    }

    async fn try_upload_settings(&self) -> Result<usize, SyncError> {
        let (config, store) = self.active()?;
        let url = config
            .file_url(&self.options.settings_file)
            .ok_or(SyncError::NotConfigured)?;

        let values = self.settings.all()?;
        let data = serde_json::to_vec(&values)?;

        prepare_directory(&config, store.as_ref()).await;
        store.write(&url, &data).await?;
        Ok(values.len())
    }

    pub async fn download_settings(&self) -> bool {
        match self.try_download_settings().await {
            Ok(done) => done,
            Err(e) => {
                log::error!("Sync: settings download failed: {}", e);
                false
            }
        }
    }

    async fn try_download_settings(&self) -> Result<bool, SyncError> {
        let (config, store) = self.active()?;
        let url = config
            .file_url(&self.options.settings_file)
            .ok_or(SyncError::NotConfigured)?;

        if !store.exists(&url).await? {
            log::info!("Sync: no remote settings at {} yet", url);
            return Ok(false);
        }
        let data = store.read(&url).await?;
        let values: Option<Map<String, Value>> = serde_json::from_slice(&data)?;
        let values = match values {
            Some(values) if !values.is_empty() => values,
            _ => {
                log::warn!("Sync: remote settings at {} are empty", url);
                return Ok(false);
            }
        };

        let mut applied = 0;
        for (key, value) in values {
            match self.registry.decide(&key, &value) {
                SettingDecision::Apply => {
                    self.settings.put(&key, value)?;
                    applied += 1;
                }
                SettingDecision::LocalOnly => log::debug!("Sync: keeping local value of {}", key),
                SettingDecision::TypeMismatch => {
                    log::warn!("Sync: ignoring remote {} with unexpected type: {}", key, value)
                }
            }
        }

        log::info!("Sync: applied {} remote settings", applied);
        self.notify(SyncEvent::SettingsApplied { count: applied });
        Ok(true)
    }

    // ===== Backup =====

    pub async fn upload_backup(&self) -> bool {
        match self.try_upload_backup().await {
            Ok(()) => {
                log::info!("Sync: backup uploaded");
                true
            }
            Err(e) => {
                log::error!("Sync: backup upload failed: {}", e);
                false
            }
        }
    }

    async fn try_upload_backup(&self) -> Result<(), SyncError> {
        let (config, store) = self.active()?;
        let url = config
            .file_url(&self.options.backup_file)
            .ok_or(SyncError::NotConfigured)?;

        let data = serde_json::to_vec(&self.backup.create()?)?;
        prepare_directory(&config, store.as_ref()).await;
        store.write(&url, &data).await?;
        Ok(())
    }

    pub async fn download_backup(&self) -> bool {
        match self.try_download_backup().await {
            Ok(done) => done,
            Err(e) => {
                log::error!("Sync: backup download failed: {}", e);
                false
            }
        }
    }

    async fn try_download_backup(&self) -> Result<bool, SyncError> {
        let (config, store) = self.active()?;
        let url = config
            .file_url(&self.options.backup_file)
            .ok_or(SyncError::NotConfigured)?;

        if !store.exists(&url).await? {
            log::info!("Sync: no remote backup at {} yet", url);
            return Ok(false);
        }
        let backup: Backup = serde_json::from_slice(&store.read(&url).await?)?;
        if !backup.is_restorable() {
            log::warn!("Sync: remote backup has no configuration, not restoring");
            return Ok(false);
        }

        self.backup.restore(backup)?;
        log::info!("Sync: backup restored");
        self.notify(SyncEvent::BackupRestored);
        Ok(true)
    }

    // ===== Composite runs =====

    /// Upload then download history. Guarded: rejected while another guarded run is in flight.
    pub async fn sync_history(self: &Arc<Self>, mode: ExecutionMode) -> SyncOutcome {
        if !self.is_configured() {
            log::warn!("Sync: history sync requested but sync is not configured");
            return SyncOutcome::Rejected;
        }
        let Some(guard) = self.flight.try_acquire() else {
            log::warn!("Sync: already syncing, history sync skipped");
            return SyncOutcome::Rejected;
        };

        let manager = Arc::clone(self);
        dispatch(mode, async move {
            let _guard = guard;
            let mut report = SyncReport::default();
            manager.run_history(&mut report).await;
            report
        })
        .await
    }

    /// Upload then download settings. Not guarded, so it may overlap a history sync.
    pub async fn sync_settings(self: &Arc<Self>, mode: ExecutionMode) -> SyncOutcome {
        if !self.is_configured() {
            log::warn!("Sync: settings sync requested but sync is not configured");
            return SyncOutcome::Rejected;
        }

        let manager = Arc::clone(self);
        dispatch(mode, async move {
            let mut report = SyncReport::default();
            manager.run_settings(&mut report).await;
            report
        })
        .await
    }

    /// History then settings, with settings run inline within the same task
    pub async fn sync_all(self: &Arc<Self>, mode: ExecutionMode) -> SyncOutcome {
        if !self.is_configured() {
            log::warn!("Sync: full sync requested but sync is not configured");
            return SyncOutcome::Rejected;
        }
        let Some(guard) = self.flight.try_acquire() else {
            log::warn!("Sync: already syncing, full sync skipped");
            return SyncOutcome::Rejected;
        };

        let manager = Arc::clone(self);
        dispatch(mode, async move {
            let _guard = guard;
            let mut report = SyncReport::default();
            manager.run_history(&mut report).await;
            manager.run_settings(&mut report).await;
            log::info!("Sync: full sync finished: {:?}", report);
            report
        })
        .await
    }

    async fn run_history(&self, report: &mut SyncReport) {
        report.history_uploaded = self.upload_history().await;
        report.history_downloaded = self.download_history().await;
    }

    async fn run_settings(&self, report: &mut SyncReport) {
        report.settings_uploaded = self.upload_settings().await;
        report.settings_downloaded = self.download_settings().await;
    }
}

fn load_remote(settings: &dyn SettingsStore, connector: &dyn RemoteConnector) -> Remote {
    let config = ResolvedConfig::resolve(&SyncSettings::from_store(settings));
    if !config.is_complete() {
        log::debug!("Sync: {:?} mode configuration incomplete", config.mode);
        return Remote { config, store: None };
    }

    let store = match connector.connect(&config) {
        Ok(store) => {
            log::info!("Sync: {:?} mode configured for {:?}", config.mode, config.base_url);
            Some(store)
        }
        Err(e) => {
            log::error!("Sync: could not create remote client: {}", e);
            None
        }
    };
    Remote { config, store }
}

/// Create the base directory in account mode. Failures are logged and ignored, since
/// some servers refuse MKCOL but still accept writes.
async fn prepare_directory(config: &ResolvedConfig, store: &dyn RemoteStore) {
    if config.mode != SyncMode::Account {
        return;
    }
    if let Some(url) = config.directory_url() {
        if let Err(e) = store.ensure_directory(&url).await {
            log::warn!("Sync: could not create {}, writing anyway: {}", url, e);
        }
    }
}

async fn dispatch<F>(mode: ExecutionMode, run: F) -> SyncOutcome
where
    F: Future<Output = SyncReport> + Send + 'static,
{
    match mode {
        ExecutionMode::Inline => SyncOutcome::Completed(run.await),
        ExecutionMode::Background => spawn_background(run),
    }
}

/// Spawn onto the current tokio runtime. Without one the run is dropped unstarted,
/// which also releases any guard it holds.
fn spawn_background<F>(run: F) -> SyncOutcome
where
    F: Future<Output = SyncReport> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => SyncOutcome::Dispatched(SyncHandle {
            task: runtime.spawn(run),
        }),
        Err(e) => {
            log::error!("Sync: cannot run in the background outside a tokio runtime: {}", e);
            SyncOutcome::Rejected
        }
    }
}
