//! Drift detection — determinism verification and snapshot comparison.

use std::collections::BTreeSet;

use checkpoint_kernel::domain::Snapshot;
use checkpoint_kernel::events::EventRecord;
use checkpoint_kernel::hashing::content_hash;
use checkpoint_kernel::merge::{merge, MergeError};

/// Merge `batch` into `prior` in forward and reverse order, then re-apply
/// it to the result. All three must agree on content.
///
/// Returns a description of the first disagreement.
pub fn verify_determinism(prior: &Snapshot, batch: &[EventRecord]) -> Result<(), String> {
    let err = |e: MergeError| e.to_string();

    let forward = merge(prior, batch).map_err(err)?.snapshot;
    let reversed: Vec<EventRecord> = batch.iter().rev().cloned().collect();
    let backward = merge(prior, &reversed).map_err(err)?.snapshot;
    let reapplied = merge(&forward, batch).map_err(err)?.snapshot;

    let h_forward = content_hash(&forward);
    let h_backward = content_hash(&backward);
    let h_reapplied = content_hash(&reapplied);

    if h_forward != h_backward {
        return Err(format!(
            "DETERMINISM FAILURE: batch order changed the result.\n\
             Forward:  {}\n\
             Reversed: {}",
            h_forward, h_backward
        ));
    }
    if h_forward != h_reapplied {
        return Err(format!(
            "DETERMINISM FAILURE: re-applying the batch changed the result.\n\
             Once:  {}\n\
             Twice: {}",
            h_forward, h_reapplied
        ));
    }
    Ok(())
}

/// Record-level differences between two snapshots of one checkpoint.
pub fn compare_snapshots(a: &Snapshot, b: &Snapshot) -> DriftReport {
    let ids_a: BTreeSet<&str> = a.records.keys().map(|s| s.as_str()).collect();
    let ids_b: BTreeSet<&str> = b.records.keys().map(|s| s.as_str()).collect();

    let added = ids_b.difference(&ids_a).map(|s| s.to_string()).collect();
    let removed = ids_a.difference(&ids_b).map(|s| s.to_string()).collect();
    let changed = ids_a
        .intersection(&ids_b)
        .filter(|id| a.records[**id] != b.records[**id])
        .map(|s| s.to_string())
        .collect();

    DriftReport {
        record_count_a: a.len(),
        record_count_b: b.len(),
        watermark_delta_ms: b.watermark.as_millis() - a.watermark.as_millis(),
        version_delta: b.snapshot_version as i64 - a.snapshot_version as i64,
        added_records: added,
        removed_records: removed,
        changed_records: changed,
        new_schema_versions: b
            .schema_versions_seen
            .difference(&a.schema_versions_seen)
            .map(|k| k.to_string())
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub record_count_a: usize,
    pub record_count_b: usize,
    pub watermark_delta_ms: i64,
    pub version_delta: i64,
    pub added_records: Vec<String>,
    /// Never non-empty between an older and newer version of a checkpoint.
    pub removed_records: Vec<String>,
    pub changed_records: Vec<String>,
    pub new_schema_versions: Vec<String>,
}

impl DriftReport {
    /// No record-level difference.
    pub fn is_empty(&self) -> bool {
        self.added_records.is_empty()
            && self.removed_records.is_empty()
            && self.changed_records.is_empty()
    }
}
