pub mod backup;
pub mod config;
pub mod encoding;
pub mod guard;
pub mod history;
pub mod memory;
pub mod reconcile;
pub mod remote;
pub mod settings;
pub mod store;
pub mod webdav;

mod manager;

pub use backup::Backup;
pub use config::{
    generate_sync_code, ResolvedConfig, SyncCredentials, SyncMode, SyncOptions, SyncSettings,
    TestResult,
};
pub use encoding::{repair, repair_history_key, repair_record};
pub use guard::{FlightGuard, SingleFlight};
pub use history::{HistoryKey, HistoryRecord, KEY_SEPARATOR};
pub use manager::{
    ExecutionMode, SyncError, SyncEvent, SyncHandle, SyncManager, SyncOutcome, SyncReport,
};
pub use reconcile::{reconcile, reconcile_with, ReconcilePolicy, Reconciliation, Verdict};
pub use remote::{ConnectionFailure, RemoteConnector, RemoteStore, WebDAVConnector};
pub use settings::{SettingDecision, SettingDef, SettingKind, SettingsRegistry};
pub use store::{BackupStore, HistoryStore, JsonSettingsFile, SettingsStore, StoreError};
pub use webdav::{ResourceInfo, WebDAVClient, WebDAVError};
