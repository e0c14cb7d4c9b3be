use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque full-state snapshot stored as `backup.json`.
///
/// Only the `config` collection is interpreted; every other section is carried
/// through as-is for the restoring side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    #[serde(default)]
    pub config: Vec<Value>,
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl Backup {
    /// A snapshot is worth restoring only when it carries configuration
    pub fn is_restorable(&self) -> bool {
        !self.config.is_empty()
    }
}
