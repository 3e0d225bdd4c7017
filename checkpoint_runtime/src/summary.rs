//! Run summary — the immutable record of one orchestrator run.

use std::fmt;

use serde::{Deserialize, Serialize};

use checkpoint_kernel::domain::Snapshot;
use checkpoint_kernel::events::Timestamp;
use checkpoint_kernel::merge::MergeOutput;
use checkpoint_kernel::validator::{InvalidRecord, ValidatedBatch};

/// Whether the run started from an existing checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    FirstRun,
    Incremental,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::FirstRun => "first_run",
            CheckpointStatus::Incremental => "incremental",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first_run" => Some(CheckpointStatus::FirstRun),
            "incremental" => Some(CheckpointStatus::Incremental),
            _ => None,
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts and invalid-record detail for one completed run.
///
/// Built once when the run reaches `Done`; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSummary {
    pub(crate) checkpoint_id: String,
    pub(crate) checkpoint_status: CheckpointStatus,
    pub(crate) events_processed: u64,
    pub(crate) events_valid: u64,
    pub(crate) events_invalid: u64,
    pub(crate) events_backfilled: u64,
    pub(crate) events_merged_new: u64,
    pub(crate) events_merged_updated: u64,
    pub(crate) events_merged_skipped_stale: u64,
    pub(crate) previous_watermark: Timestamp,
    pub(crate) new_watermark: Timestamp,
    pub(crate) snapshot_version_before: u64,
    pub(crate) snapshot_version_after: u64,
    pub(crate) invalid_records: Vec<InvalidRecord>,
}

impl RunSummary {
    pub(crate) fn from_run(
        checkpoint_id: &str,
        checkpoint_status: CheckpointStatus,
        prior: &Snapshot,
        batch: ValidatedBatch,
        merged: &MergeOutput,
    ) -> Self {
        Self {
            checkpoint_id: checkpoint_id.to_string(),
            checkpoint_status,
            events_processed: batch.processed() as u64,
            events_valid: batch.valid.len() as u64,
            events_invalid: batch.invalid.len() as u64,
            events_backfilled: batch.backfilled,
            events_merged_new: merged.counts.merged_new,
            events_merged_updated: merged.counts.merged_updated,
            events_merged_skipped_stale: merged.counts.merged_skipped_stale,
            previous_watermark: prior.watermark,
            new_watermark: merged.snapshot.watermark,
            snapshot_version_before: prior.snapshot_version,
            snapshot_version_after: merged.snapshot.snapshot_version,
            invalid_records: batch.invalid,
        }
    }

    pub fn checkpoint_id(&self) -> &str {
        &self.checkpoint_id
    }

    pub fn checkpoint_status(&self) -> CheckpointStatus {
        self.checkpoint_status
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn events_valid(&self) -> u64 {
        self.events_valid
    }

    pub fn events_invalid(&self) -> u64 {
        self.events_invalid
    }

    pub fn events_backfilled(&self) -> u64 {
        self.events_backfilled
    }

    pub fn events_merged_new(&self) -> u64 {
        self.events_merged_new
    }

    pub fn events_merged_updated(&self) -> u64 {
        self.events_merged_updated
    }

    pub fn events_merged_skipped_stale(&self) -> u64 {
        self.events_merged_skipped_stale
    }

    pub fn previous_watermark(&self) -> Timestamp {
        self.previous_watermark
    }

    pub fn new_watermark(&self) -> Timestamp {
        self.new_watermark
    }

    pub fn snapshot_version_before(&self) -> u64 {
        self.snapshot_version_before
    }

    pub fn snapshot_version_after(&self) -> u64 {
        self.snapshot_version_after
    }

    /// Rejected inputs in batch order.
    pub fn invalid_records(&self) -> &[InvalidRecord] {
        &self.invalid_records
    }
}
