use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Separator between the segments of a history key
pub const KEY_SEPARATOR: &str = "@@@";

/// Sentinel for an unknown playback offset
pub const UNKNOWN_POSITION: i64 = -1;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// A watch-progress entry as stored locally and in `history.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Composite key: `siteKey@@@vodId@@@episodeId`
    #[serde(default)]
    pub key: String,
    /// Display title
    #[serde(default)]
    pub vod_name: String,
    /// Playback position in milliseconds, negative when unknown
    #[serde(default = "unknown_position")]
    pub position: i64,
    /// Media duration in milliseconds, negative when unknown
    #[serde(default = "unknown_position")]
    pub duration: i64,
    /// Last-touched timestamp, epoch milliseconds
    #[serde(default)]
    pub create_time: i64,
    /// Every other field of the wire object, carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unknown_position() -> i64 {
    UNKNOWN_POSITION
}

impl HistoryRecord {
    pub fn new(key: impl Into<String>, vod_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            vod_name: vod_name.into(),
            position: UNKNOWN_POSITION,
            duration: UNKNOWN_POSITION,
            create_time: 0,
            extra: Map::new(),
        }
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    pub fn with_create_time(mut self, create_time: i64) -> Self {
        self.create_time = create_time;
        self
    }

    pub fn has_position(&self) -> bool {
        self.position >= 0
    }

    /// Whether this record falls before the retention cutoff
    pub fn is_expired(&self, cutoff: i64) -> bool {
        self.create_time < cutoff
    }
}

/// Oldest `createTime` still inside a retention window of `days` days
pub fn retention_cutoff(now: i64, days: i64) -> i64 {
    now - days * DAY_MS
}

/// Parsed form of a history key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryKey {
    pub site_key: String,
    pub vod_id: String,
    pub episode_id: String,
}

impl HistoryKey {
    pub fn new(
        site_key: impl Into<String>,
        vod_id: impl Into<String>,
        episode_id: impl Into<String>,
    ) -> Self {
        Self {
            site_key: site_key.into(),
            vod_id: vod_id.into(),
            episode_id: episode_id.into(),
        }
    }

    /// Split a composite key. Anything after the third separator stays in `episode_id`.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, KEY_SEPARATOR);
        let site_key = parts.next()?;
        let vod_id = parts.next()?;
        let episode_id = parts.next()?;
        Some(Self::new(site_key, vod_id, episode_id))
    }
}

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.site_key,
            self.vod_id,
            self.episode_id,
            sep = KEY_SEPARATOR
        )
    }
}
