use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::reconcile::ReconcilePolicy;
use super::store::SettingsStore;

/// Settings keys holding the sync configuration
pub const KEY_SYNC_MODE: &str = "webdav_sync_mode";
pub const KEY_URL: &str = "webdav_url";
pub const KEY_USERNAME: &str = "webdav_username";
pub const KEY_PASSWORD: &str = "webdav_password";
pub const KEY_SYNC_CODE: &str = "webdav_sync_code";
pub const KEY_PUBLIC_URL: &str = "webdav_public_url";

/// Alphabet sync codes are drawn from
pub const SYNC_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const SYNC_CODE_LEN: usize = 8;

/// How the remote store is addressed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMode {
    /// Credentialed WebDAV endpoint
    #[default]
    Account,
    /// Public endpoint, addressed by a shared sync code path segment
    Code,
}

impl SyncMode {
    /// `"CODE"` selects code mode; anything else is account mode
    pub fn from_setting(value: &str) -> Self {
        if value == "CODE" {
            Self::Code
        } else {
            Self::Account
        }
    }
}

/// Credentials for WebDAV authentication
#[derive(Clone, PartialEq, Eq)]
pub struct SyncCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SyncCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// User-supplied sync inputs, as stored in the settings map
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,
    /// WebDAV server URL (e.g., "https://dav.example.com/dav/")
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Shared code used as the remote sub-directory in code mode
    #[serde(default)]
    pub sync_code: String,
    /// Public storage base URL used in code mode
    #[serde(default)]
    pub public_url: String,
}

impl SyncSettings {
    /// Read the sync inputs out of the settings store
    pub fn from_store(store: &dyn SettingsStore) -> Self {
        let text = |key: &str| match store.get(key) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };

        Self {
            mode: SyncMode::from_setting(&text(KEY_SYNC_MODE)),
            url: text(KEY_URL),
            username: text(KEY_USERNAME),
            password: text(KEY_PASSWORD),
            sync_code: text(KEY_SYNC_CODE),
            public_url: text(KEY_PUBLIC_URL),
        }
    }
}

/// Effective remote location derived from [`SyncSettings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub mode: SyncMode,
    pub base_url: Option<String>,
    pub credentials: Option<SyncCredentials>,
    pub sync_code: Option<String>,
}

impl ResolvedConfig {
    pub fn resolve(settings: &SyncSettings) -> Self {
        match settings.mode {
            SyncMode::Account => Self {
                mode: SyncMode::Account,
                base_url: non_empty(&settings.url),
                credentials: Some(SyncCredentials {
                    username: settings.username.clone(),
                    password: settings.password.clone(),
                }),
                sync_code: None,
            },
            SyncMode::Code => Self {
                mode: SyncMode::Code,
                base_url: public_base_url(&settings.public_url, &settings.sync_code),
                credentials: None,
                sync_code: non_empty(&settings.sync_code),
            },
        }
    }

    /// Whether every input the active mode needs is present
    pub fn is_complete(&self) -> bool {
        if self.base_url.is_none() {
            return false;
        }
        match self.mode {
            SyncMode::Account => self
                .credentials
                .as_ref()
                .is_some_and(|c| !c.username.is_empty() && !c.password.is_empty()),
            SyncMode::Code => self.sync_code.is_some(),
        }
    }

    /// Base URL with a guaranteed trailing separator
    pub fn directory_url(&self) -> Option<String> {
        self.base_url.as_deref().map(with_trailing_slash)
    }

    /// Absolute URL of a file directly under the base URL
    pub fn file_url(&self, filename: &str) -> Option<String> {
        self.directory_url().map(|dir| format!("{}{}", dir, filename))
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Public template plus the sync code as a sub-directory
fn public_base_url(template: &str, sync_code: &str) -> Option<String> {
    if template.is_empty() {
        return None;
    }
    if sync_code.is_empty() {
        return Some(template.to_string());
    }
    Some(format!("{}{}/", with_trailing_slash(template), sync_code))
}

/// Generate a fresh 8-character sync code
pub fn generate_sync_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SYNC_CODE_LEN)
        .map(|_| SYNC_CODE_ALPHABET[rng.gen_range(0..SYNC_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Tunables for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncOptions {
    pub history_file: String,
    pub settings_file: String,
    pub backup_file: String,
    /// Local history retention window in days
    pub retention_days: i64,
    /// Move expired remote records back into the retention window on download
    pub resurrect_expired: bool,
    pub policy: ReconcilePolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            history_file: "history.json".to_string(),
            settings_file: "settings.json".to_string(),
            backup_file: "backup.json".to_string(),
            retention_days: 60,
            resurrect_expired: true,
            policy: ReconcilePolicy::default(),
        }
    }
}

impl SyncOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Result of a connection self-test
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    pub success: bool,
    pub message: String,
}

impl TestResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(url: &str, user: &str, pass: &str) -> SyncSettings {
        SyncSettings {
            mode: SyncMode::Account,
            url: url.to_string(),
            username: user.to_string(),
            password: pass.to_string(),
            ..Default::default()
        }
    }

    fn code(public_url: &str, sync_code: &str) -> SyncSettings {
        SyncSettings {
            mode: SyncMode::Code,
            public_url: public_url.to_string(),
            sync_code: sync_code.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_account_mode_requires_all_fields() {
        assert!(ResolvedConfig::resolve(&account("https://dav.example/dav", "u", "p")).is_complete());
        assert!(!ResolvedConfig::resolve(&account("", "u", "p")).is_complete());
        assert!(!ResolvedConfig::resolve(&account("https://dav.example/dav", "", "p")).is_complete());
        assert!(!ResolvedConfig::resolve(&account("https://dav.example/dav", "u", "")).is_complete());
    }

    #[test]
    fn test_code_mode_appends_sync_code() {
        let config = ResolvedConfig::resolve(&code("https://pub.example/raw", "ABCD1234"));
        assert_eq!(config.base_url.as_deref(), Some("https://pub.example/raw/ABCD1234/"));
        assert!(config.credentials.is_none());
        assert!(config.is_complete());
        assert_eq!(
            config.file_url("history.json").as_deref(),
            Some("https://pub.example/raw/ABCD1234/history.json")
        );
    }

    #[test]
    fn test_code_mode_without_template_is_unconfigured() {
        let config = ResolvedConfig::resolve(&code("", "ABCD1234"));
        assert_eq!(config.base_url, None);
        assert!(!config.is_complete());
    }

    #[test]
    fn test_code_mode_without_code_is_unconfigured() {
        let config = ResolvedConfig::resolve(&code("https://pub.example/raw/", ""));
        assert_eq!(config.base_url.as_deref(), Some("https://pub.example/raw/"));
        assert!(!config.is_complete());
    }

    #[test]
    fn test_file_url_adds_separator() {
        let config = ResolvedConfig::resolve(&account("https://dav.example/dav", "u", "p"));
        assert_eq!(
            config.file_url("settings.json").as_deref(),
            Some("https://dav.example/dav/settings.json")
        );
    }

    #[test]
    fn test_generate_sync_code() {
        for _ in 0..50 {
            let code = generate_sync_code();
            assert_eq!(code.len(), SYNC_CODE_LEN);
            assert!(code.bytes().all(|b| SYNC_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_mode_from_setting() {
        assert_eq!(SyncMode::from_setting("CODE"), SyncMode::Code);
        assert_eq!(SyncMode::from_setting("ACCOUNT"), SyncMode::Account);
        assert_eq!(SyncMode::from_setting(""), SyncMode::Account);
    }

    #[test]
    fn test_options_from_toml() {
        let options = SyncOptions::from_toml_str(
            r#"
            history_file = "xmbox_history.json"
            retention_days = 30

            [policy]
            drift_ms = 120000
            "#,
        )
        .unwrap();

        assert_eq!(options.history_file, "xmbox_history.json");
        assert_eq!(options.settings_file, "settings.json");
        assert_eq!(options.retention_days, 30);
        assert!(options.resurrect_expired);
        assert_eq!(options.policy.drift_ms, 120_000);
        assert_eq!(options.policy.tolerance_ms, 1000);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = SyncCredentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }
}
