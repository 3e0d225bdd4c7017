//! Processing orchestrator — one checkpoint run, load to persist.
//!
//! Stage order:
//!   1. Loading:     fetch the prior snapshot (absent means first run)
//!   2. Validating:  classify every raw input; invalid ones are collected
//!   3. Merging:     fold valid records into a copy of the prior snapshot
//!   4. Persisting:  conditional write against the loaded version
//!   5. Done:        summary built, optionally journaled
//!
//! Any store or merge failure moves the run to Failed. Nothing durable
//! changes unless the persist step itself succeeded.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use checkpoint_kernel::domain::Snapshot;
use checkpoint_kernel::events::RawRecord;
use checkpoint_kernel::merge::{merge, MergeError};
use checkpoint_kernel::schema::SchemaRegistry;
use checkpoint_kernel::validator::RecordValidator;

use crate::journal::RunJournal;
use crate::store::{CheckpointStore, StoreError};
use crate::summary::{CheckpointStatus, RunSummary};

// ── Stages ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    Loading,
    Validating,
    Merging,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStage::Idle => "idle",
            RunStage::Loading => "loading",
            RunStage::Validating => "validating",
            RunStage::Merging => "merging",
            RunStage::Persisting => "persisting",
            RunStage::Done => "done",
            RunStage::Failed => "failed",
        })
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum InfrastructureFault {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// A run that did not reach `Done`. The stored checkpoint is unchanged.
#[derive(Debug, Error)]
#[error("checkpoint run failed during {stage}: {fault}")]
pub struct RunError {
    /// Stage that was active when the fault happened.
    pub stage: RunStage,
    #[source]
    pub fault: InfrastructureFault,
}

impl RunError {
    /// Always false: a failed run never leaves a partial write behind.
    pub fn durable_state_changed(&self) -> bool {
        false
    }

    pub fn is_retryable(&self) -> bool {
        match &self.fault {
            InfrastructureFault::Store(e) => e.is_retryable(),
            InfrastructureFault::Merge(_) => false,
        }
    }
}

// ── Orchestrator ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub snapshot_version: u64,
}

pub struct Orchestrator<S> {
    validator: RecordValidator,
    store: S,
    journal: Option<RunJournal>,
    stage: RunStage,
}

impl<S: CheckpointStore> Orchestrator<S> {
    pub fn new(registry: Arc<SchemaRegistry>, store: S) -> Self {
        Self {
            validator: RecordValidator::new(registry),
            store,
            journal: None,
            stage: RunStage::Idle,
        }
    }

    /// Append every completed run's summary to `journal`.
    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn journal(&self) -> Option<&RunJournal> {
        self.journal.as_ref()
    }

    /// Stage the most recent run ended in (`Idle` before any run).
    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Execute one run over `inputs` against `checkpoint_id`.
    pub fn run(
        &mut self,
        checkpoint_id: &str,
        inputs: &[RawRecord],
    ) -> Result<RunOutcome, RunError> {
        match self.execute(checkpoint_id, inputs) {
            Ok(outcome) => {
                self.enter(checkpoint_id, RunStage::Done);
                self.record(&outcome.summary);
                Ok(outcome)
            }
            Err(err) => {
                self.enter(checkpoint_id, RunStage::Failed);
                tracing::error!(
                    checkpoint_id,
                    stage = %err.stage,
                    retryable = err.is_retryable(),
                    error = %err.fault,
                    "checkpoint run failed"
                );
                Err(err)
            }
        }
    }

    fn execute(
        &mut self,
        checkpoint_id: &str,
        inputs: &[RawRecord],
    ) -> Result<RunOutcome, RunError> {
        self.enter(checkpoint_id, RunStage::Loading);
        let loaded = self
            .store
            .load(checkpoint_id)
            .map_err(|e| fail(RunStage::Loading, e))?;
        let (prior, status) = match loaded {
            Some(snapshot) => (snapshot, CheckpointStatus::Incremental),
            None => (Snapshot::empty(), CheckpointStatus::FirstRun),
        };
        tracing::info!(
            checkpoint_id,
            status = %status,
            snapshot_version = prior.snapshot_version,
            records = prior.len(),
            "checkpoint loaded"
        );

        self.enter(checkpoint_id, RunStage::Validating);
        let batch = self.validator.validate_batch(inputs);
        for invalid in &batch.invalid {
            tracing::debug!(
                checkpoint_id,
                position = invalid.position,
                source_key = invalid.source_key.as_deref().unwrap_or(""),
                reason = %invalid.reason,
                "input rejected"
            );
        }

        self.enter(checkpoint_id, RunStage::Merging);
        let merged = merge(&prior, &batch.valid).map_err(|e| fail(RunStage::Merging, e))?;

        self.enter(checkpoint_id, RunStage::Persisting);
        self.store
            .persist(checkpoint_id, &merged.snapshot, prior.snapshot_version)
            .map_err(|e| fail(RunStage::Persisting, e))?;

        let summary = RunSummary::from_run(checkpoint_id, status, &prior, batch, &merged);
        tracing::info!(
            checkpoint_id,
            processed = summary.events_processed(),
            valid = summary.events_valid(),
            invalid = summary.events_invalid(),
            merged_new = summary.events_merged_new(),
            merged_updated = summary.events_merged_updated(),
            skipped_stale = summary.events_merged_skipped_stale(),
            snapshot_version = summary.snapshot_version_after(),
            "checkpoint persisted"
        );
        Ok(RunOutcome {
            snapshot_version: summary.snapshot_version_after(),
            summary,
        })
    }

    fn enter(&mut self, checkpoint_id: &str, stage: RunStage) {
        tracing::debug!(checkpoint_id, from = %self.stage, to = %stage, "stage transition");
        self.stage = stage;
    }

    /// Journal failures are logged, never fatal: the checkpoint is
    /// already durable at this point.
    fn record(&mut self, summary: &RunSummary) {
        if let Some(journal) = self.journal.as_mut() {
            match journal.append(summary) {
                Ok(sequence) => tracing::debug!(sequence, "run journaled"),
                Err(e) => tracing::warn!(
                    path = %journal.path().display(),
                    error = %e,
                    "failed to append run summary to journal"
                ),
            }
        }
    }
}

fn fail(stage: RunStage, fault: impl Into<InfrastructureFault>) -> RunError {
    RunError {
        stage,
        fault: fault.into(),
    }
}
