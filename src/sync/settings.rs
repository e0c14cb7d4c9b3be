//! Typed registry deciding which settings travel between devices.

use std::collections::HashMap;

use serde_json::Value;

use super::config::{KEY_PASSWORD, KEY_PUBLIC_URL, KEY_SYNC_CODE, KEY_SYNC_MODE, KEY_URL, KEY_USERNAME};

/// Namespace reserved for sync configuration
pub const RESERVED_PREFIX: &str = "webdav_";

pub const KEY_DEVICE_UUID: &str = "device_uuid";
pub const KEY_DEVICE_NAME: &str = "device_name";

/// Declared value type of a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Bool,
    Integer,
    Number,
    Text,
    /// Any JSON value
    Json,
}

impl SettingKind {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Text => value.is_string(),
            Self::Json => true,
        }
    }
}

/// A recognized setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingDef {
    pub key: String,
    pub kind: SettingKind,
    /// Whether a remote value may overwrite the local one
    pub syncable: bool,
}

impl SettingDef {
    pub fn synced(key: impl Into<String>, kind: SettingKind) -> Self {
        Self {
            key: key.into(),
            kind,
            syncable: true,
        }
    }

    pub fn local_only(key: impl Into<String>, kind: SettingKind) -> Self {
        Self {
            key: key.into(),
            kind,
            syncable: false,
        }
    }
}

/// What to do with one downloaded setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingDecision {
    Apply,
    /// Device or sync configuration; never taken from the remote
    LocalOnly,
    /// Registered key whose remote value has the wrong type
    TypeMismatch,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsRegistry {
    defs: HashMap<String, SettingDef>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the sync configuration and device identity marked local-only
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for key in [KEY_SYNC_MODE, KEY_URL, KEY_USERNAME, KEY_PASSWORD, KEY_SYNC_CODE, KEY_PUBLIC_URL] {
            registry.register(SettingDef::local_only(key, SettingKind::Text));
        }
        registry.register(SettingDef::local_only(KEY_DEVICE_UUID, SettingKind::Text));
        registry.register(SettingDef::local_only(KEY_DEVICE_NAME, SettingKind::Text));
        registry
    }

    pub fn register(&mut self, def: SettingDef) -> &mut Self {
        self.defs.insert(def.key.clone(), def);
        self
    }

    pub fn get(&self, key: &str) -> Option<&SettingDef> {
        self.defs.get(key)
    }

    /// Decide whether a remote `value` for `key` replaces the local one.
    ///
    /// Unregistered keys are applied unless they sit in the reserved
    /// sync-configuration namespace.
    pub fn decide(&self, key: &str, value: &Value) -> SettingDecision {
        match self.defs.get(key) {
            Some(def) if !def.syncable => SettingDecision::LocalOnly,
            Some(def) if !def.kind.accepts(value) => SettingDecision::TypeMismatch,
            Some(_) => SettingDecision::Apply,
            None if key.starts_with(RESERVED_PREFIX) => SettingDecision::LocalOnly,
            None => SettingDecision::Apply,
        }
    }
}
