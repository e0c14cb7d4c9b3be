//! Two-replica merge of watch history.
//!
//! Remote records are compared against local ones by key. New keys are
//! inserted; shared keys are replaced wholesale when the remote copy wins the
//! timestamp/position tie-break in [`decide`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::history::HistoryRecord;

/// Thresholds used when comparing two copies of the same record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilePolicy {
    /// Timestamps closer than this are treated as simultaneous
    pub tolerance_ms: i64,
    /// How far remote playback must be ahead to beat a newer local timestamp
    pub drift_ms: i64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            tolerance_ms: 1000,
            drift_ms: 60_000,
        }
    }
}

/// Outcome of comparing a local record with its remote counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Remote timestamp is newer beyond the tolerance
    RemoteNewer,
    /// Simultaneous, remote position is further along
    FurtherProgress,
    /// Simultaneous, only remote has a valid position
    RemoteHasPosition,
    /// Local is newer, but remote playback is well ahead
    DriftCompensation,
    /// Local copy stays
    KeepLocal,
}

impl Verdict {
    pub fn is_update(self) -> bool {
        !matches!(self, Verdict::KeepLocal)
    }
}

/// Decide whether `remote` should replace `local`
pub fn decide(policy: &ReconcilePolicy, local: &HistoryRecord, remote: &HistoryRecord) -> Verdict {
    let delta = remote.create_time - local.create_time;
    let both_positioned = local.has_position() && remote.has_position();

    if delta > policy.tolerance_ms {
        Verdict::RemoteNewer
    } else if delta.abs() <= policy.tolerance_ms {
        if both_positioned && remote.position > local.position {
            Verdict::FurtherProgress
        } else if remote.has_position() && !local.has_position() {
            Verdict::RemoteHasPosition
        } else {
            Verdict::KeepLocal
        }
    } else if both_positioned && remote.position > local.position + policy.drift_ms {
        Verdict::DriftCompensation
    } else {
        Verdict::KeepLocal
    }
}

/// Local deltas produced by a merge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Remote records with no local counterpart
    pub to_insert: Vec<HistoryRecord>,
    /// Remote records that replace their local counterpart
    pub to_update: Vec<HistoryRecord>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty()
    }
}

/// Merge with the default policy
pub fn reconcile(local: &[HistoryRecord], remote: &[HistoryRecord]) -> Reconciliation {
    reconcile_with(&ReconcilePolicy::default(), local, remote)
}

/// Compute which remote records to insert and which to apply as updates
pub fn reconcile_with(
    policy: &ReconcilePolicy,
    local: &[HistoryRecord],
    remote: &[HistoryRecord],
) -> Reconciliation {
    let local_index: HashMap<&str, &HistoryRecord> =
        local.iter().map(|r| (r.key.as_str(), r)).collect();

    // Collapse duplicate remote keys, last wins, keeping first-seen order
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &HistoryRecord> = HashMap::new();
    for record in remote {
        if record.key.is_empty() {
            log::warn!("reconcile: skipping remote record without key ('{}')", record.vod_name);
            continue;
        }
        if latest.insert(record.key.as_str(), record).is_none() {
            order.push(record.key.as_str());
        }
    }

    let mut result = Reconciliation::default();
    for key in order {
        let remote_record = latest[key];
        match local_index.get(key) {
            None => {
                log::debug!("reconcile: new record '{}' ({})", remote_record.vod_name, key);
                result.to_insert.push(remote_record.clone());
            }
            Some(local_record) => {
                let verdict = decide(policy, local_record, remote_record);
                log::debug!(
                    "reconcile: '{}' ({}) remote_time={} local_time={} remote_pos={} local_pos={} -> {:?}",
                    remote_record.vod_name,
                    key,
                    remote_record.create_time,
                    local_record.create_time,
                    remote_record.position,
                    local_record.position,
                    verdict,
                );
                if verdict.is_update() {
                    result.to_update.push(remote_record.clone());
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, position: i64, create_time: i64) -> HistoryRecord {
        HistoryRecord::new(key, key)
            .with_position(position)
            .with_create_time(create_time)
    }

    fn verdict(local: &HistoryRecord, remote: &HistoryRecord) -> Verdict {
        decide(&ReconcilePolicy::default(), local, remote)
    }

    #[test]
    fn test_remote_newer_wins() {
        let local = record("k", 900, 10_000);
        let remote = record("k", 100, 12_000);
        assert_eq!(verdict(&local, &remote), Verdict::RemoteNewer);
    }

    #[test]
    fn test_simultaneous_compares_position() {
        let remote = record("k", 500, 10_500);
        assert_eq!(verdict(&record("k", 200, 10_000), &remote), Verdict::FurtherProgress);
        assert_eq!(verdict(&record("k", 900, 10_000), &remote), Verdict::KeepLocal);
    }

    #[test]
    fn test_simultaneous_tolerance_is_inclusive() {
        let local = record("k", 200, 10_000);
        assert_eq!(verdict(&local, &record("k", 500, 11_000)), Verdict::FurtherProgress);
        assert_eq!(verdict(&local, &record("k", 500, 9_000)), Verdict::FurtherProgress);
        // One past the window with an older remote falls to the drift rule
        assert_eq!(verdict(&local, &record("k", 500, 8_999)), Verdict::KeepLocal);
    }

    #[test]
    fn test_simultaneous_remote_only_valid_position() {
        let local = record("k", -1, 10_000);
        assert_eq!(verdict(&local, &record("k", 0, 10_000)), Verdict::RemoteHasPosition);
        assert_eq!(verdict(&local, &record("k", -1, 10_000)), Verdict::KeepLocal);
        assert_eq!(verdict(&record("k", 50, 10_000), &record("k", -1, 10_000)), Verdict::KeepLocal);
    }

    #[test]
    fn test_drift_compensation() {
        let local = record("k", 100_000, 200_000);
        let far_ahead = record("k", 190_000, 80_000);
        let slightly_ahead = record("k", 110_000, 80_000);
        assert_eq!(verdict(&local, &far_ahead), Verdict::DriftCompensation);
        assert_eq!(verdict(&local, &slightly_ahead), Verdict::KeepLocal);
    }

    #[test]
    fn test_drift_requires_valid_positions() {
        let local = record("k", -1, 200_000);
        let remote = record("k", 500_000, 80_000);
        assert_eq!(verdict(&local, &remote), Verdict::KeepLocal);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let local = vec![record("A", 100, 1000)];
        let remote = vec![record("A", 500, 1000), record("B", 0, 2000)];

        let merged = reconcile(&local, &remote);
        assert_eq!(merged.to_insert, vec![record("B", 0, 2000)]);
        assert_eq!(merged.to_update, vec![record("A", 500, 1000)]);
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let local = vec![record("A", 100, 1000), record("C", 5, 50_000)];
        let remote = vec![
            record("A", 500, 1000),
            record("B", 0, 2000),
            record("C", 1, 52_000),
        ];
        assert_eq!(reconcile(&local, &remote), reconcile(&local, &remote));
    }

    #[test]
    fn test_empty_remote_keys_discarded() {
        let remote = vec![record("", 10, 10), record("X", 10, 10)];
        let merged = reconcile(&[], &remote);
        assert_eq!(merged.to_insert.len(), 1);
        assert_eq!(merged.to_insert[0].key, "X");
    }

    #[test]
    fn test_duplicate_remote_keys_last_wins() {
        let remote = vec![record("X", 10, 10), record("Y", 1, 1), record("X", 20, 20)];
        let merged = reconcile(&[], &remote);
        assert_eq!(merged.to_insert, vec![record("X", 20, 20), record("Y", 1, 1)]);
    }

    #[test]
    fn test_identical_replicas_produce_nothing() {
        let records = vec![record("A", 100, 1000), record("B", 7, 3000)];
        assert!(reconcile(&records, &records).is_empty());
    }
}
