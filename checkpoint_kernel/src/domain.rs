//! Checkpoint domain types.
//!
//! Pure data. No behaviour beyond construction and comparison.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::events::{EventRecord, SchemaKey, Timestamp};

/// Materialized checkpoint state as of one point in processing.
///
/// Sorted containers keep serialization and iteration order stable,
/// independent of the order records arrived in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    /// Latest-known record per `event_id`.
    pub records: BTreeMap<String, EventRecord>,
    /// Greatest `occurred_at` ever incorporated.
    pub watermark: Timestamp,
    pub schema_versions_seen: BTreeSet<SchemaKey>,
    /// Incremented on every successful merge. 0 means "never persisted".
    pub snapshot_version: u64,
}

impl Snapshot {
    /// The state of a checkpoint that has never been written.
    pub fn empty() -> Self {
        Self {
            records: BTreeMap::new(),
            watermark: Timestamp::EPOCH,
            schema_versions_seen: BTreeSet::new(),
            snapshot_version: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, event_id: &str) -> Option<&EventRecord> {
        self.records.get(event_id)
    }

    /// Equality of everything except `snapshot_version`.
    ///
    /// Re-applying a batch bumps the version but must leave content alone.
    pub fn same_content(&self, other: &Snapshot) -> bool {
        self.watermark == other.watermark
            && self.schema_versions_seen == other.schema_versions_seen
            && self.records == other.records
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Per-merge bookkeeping of what happened to each incoming record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeCounts {
    pub merged_new: u64,
    pub merged_updated: u64,
    pub merged_skipped_stale: u64,
}

impl MergeCounts {
    pub fn total(&self) -> u64 {
        self.merged_new + self.merged_updated + self.merged_skipped_stale
    }
}
