//! Dedup/merge — the incremental checkpoint step.
//!
//! ALL snapshot-mutation logic lives here. The prior snapshot is never
//! mutated; a clone is made first and transformed.
//!
//! Precedence between two records for the same event_id, highest wins:
//!   1. occurred_at
//!   2. schema_version
//!   3. event_id (lexicographic)
//!   4. canonical content digest
//!
//! The order is total, so the resulting snapshot depends only on the
//! prior snapshot and the multiset of incoming records.

use std::cmp::Ordering;

use thiserror::Error;

use crate::domain::{MergeCounts, Snapshot};
use crate::events::EventRecord;
use crate::hashing::record_digest;
use crate::invariants::check_snapshot;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MergeError {
    /// The prior snapshot fails integrity checks; merging into it is unsafe.
    #[error("prior snapshot is corrupt: {0}")]
    CorruptSnapshot(String),
}

/// A new snapshot and what happened to each incoming record.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutput {
    pub snapshot: Snapshot,
    pub counts: MergeCounts,
}

/// Total precedence order between two records.
///
/// `Ordering::Greater` means `a` should be the stored record.
pub fn precedence(a: &EventRecord, b: &EventRecord) -> Ordering {
    a.occurred_at
        .cmp(&b.occurred_at)
        .then_with(|| a.schema_version.cmp(&b.schema_version))
        .then_with(|| a.event_id.cmp(&b.event_id))
        .then_with(|| {
            if a.payload == b.payload && a.event_type == b.event_type {
                Ordering::Equal
            } else {
                record_digest(a).cmp(&record_digest(b))
            }
        })
}

/// Merge a batch of validated records into `prior`.
///
/// Records are applied in input order; a record replaces the stored one
/// only if it strictly wins `precedence`. Exact duplicates count as stale.
pub fn merge(prior: &Snapshot, records: &[EventRecord]) -> Result<MergeOutput, MergeError> {
    check_snapshot(prior).map_err(MergeError::CorruptSnapshot)?;

    let mut snapshot = prior.clone();
    let mut counts = MergeCounts::default();

    for record in records {
        snapshot.schema_versions_seen.insert(record.schema_key());
        if record.occurred_at > snapshot.watermark {
            snapshot.watermark = record.occurred_at;
        }

        match snapshot.records.get_mut(&record.event_id) {
            None => {
                snapshot
                    .records
                    .insert(record.event_id.clone(), record.clone());
                counts.merged_new += 1;
            }
            Some(existing) => {
                if precedence(record, existing) == Ordering::Greater {
                    *existing = record.clone();
                    counts.merged_updated += 1;
                } else {
                    counts.merged_skipped_stale += 1;
                }
            }
        }
    }

    snapshot.snapshot_version += 1;

    Ok(MergeOutput { snapshot, counts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{SchemaKey, Timestamp};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn rec(id: &str, at: i64, version: u32, ptid: &str) -> EventRecord {
        let mut payload = BTreeMap::new();
        payload.insert("ptid".to_string(), json!(ptid));
        EventRecord {
            event_id: id.to_string(),
            event_type: "visit".to_string(),
            occurred_at: Timestamp::from_millis(at).unwrap(),
            schema_version: version,
            payload,
        }
    }

    #[test]
    fn new_records_are_inserted() {
        let out = merge(&Snapshot::empty(), &[rec("e1", 10, 1, "A"), rec("e2", 20, 1, "B")]).unwrap();
        assert_eq!(out.counts.merged_new, 2);
        assert_eq!(out.snapshot.len(), 2);
        assert_eq!(out.snapshot.watermark.as_millis(), 20);
        assert_eq!(out.snapshot.snapshot_version, 1);
    }

    #[test]
    fn later_record_replaces_earlier() {
        let out = merge(&Snapshot::empty(), &[rec("e1", 10, 1, "A"), rec("e1", 30, 1, "B")]).unwrap();
        assert_eq!(out.counts.merged_new, 1);
        assert_eq!(out.counts.merged_updated, 1);
        assert_eq!(out.snapshot.get("e1").unwrap().payload["ptid"], json!("B"));
    }

    #[test]
    fn exact_duplicate_is_stale() {
        let out = merge(&Snapshot::empty(), &[rec("e1", 10, 1, "A"), rec("e1", 10, 1, "A")]).unwrap();
        assert_eq!(out.counts.merged_skipped_stale, 1);
    }

    #[test]
    fn higher_schema_version_breaks_time_tie() {
        let a = rec("e1", 10, 1, "A");
        let b = rec("e1", 10, 2, "A");
        assert_eq!(precedence(&b, &a), Ordering::Greater);
        assert_eq!(precedence(&a, &b), Ordering::Less);
    }

    #[test]
    fn content_digest_breaks_full_tie_symmetrically() {
        let a = rec("e1", 10, 1, "A");
        let b = rec("e1", 10, 1, "B");
        assert_eq!(precedence(&a, &b), precedence(&b, &a).reverse());
        assert_ne!(precedence(&a, &b), Ordering::Equal);
    }

    #[test]
    fn prior_is_not_mutated() {
        let first = merge(&Snapshot::empty(), &[rec("e1", 10, 1, "A")]).unwrap().snapshot;
        let before = first.clone();
        let _ = merge(&first, &[rec("e1", 50, 1, "Z"), rec("e9", 5, 1, "Q")]).unwrap();
        assert_eq!(first, before);
    }

    #[test]
    fn watermark_never_moves_back() {
        let first = merge(&Snapshot::empty(), &[rec("e1", 100, 1, "A")]).unwrap().snapshot;
        let second = merge(&first, &[rec("e2", 40, 1, "B")]).unwrap().snapshot;
        assert_eq!(second.watermark.as_millis(), 100);
    }

    #[test]
    fn stale_records_still_record_their_shape() {
        let first = merge(&Snapshot::empty(), &[rec("e1", 100, 2, "A")]).unwrap().snapshot;
        let second = merge(&first, &[rec("e1", 50, 1, "old")]).unwrap();
        assert_eq!(second.counts.merged_skipped_stale, 1);
        assert!(second
            .snapshot
            .schema_versions_seen
            .contains(&SchemaKey::new("visit", 1)));
    }

    #[test]
    fn corrupt_prior_is_rejected() {
        let mut prior = merge(&Snapshot::empty(), &[rec("e1", 100, 1, "A")]).unwrap().snapshot;
        prior.watermark = Timestamp::EPOCH;
        let err = merge(&prior, &[]).unwrap_err();
        assert!(matches!(err, MergeError::CorruptSnapshot(_)));
    }

    #[test]
    fn empty_batch_only_bumps_version() {
        let first = merge(&Snapshot::empty(), &[rec("e1", 100, 1, "A")]).unwrap().snapshot;
        let second = merge(&first, &[]).unwrap();
        assert!(second.snapshot.same_content(&first));
        assert_eq!(second.snapshot.snapshot_version, 2);
        assert_eq!(second.counts.total(), 0);
    }
}
