//! Checkpoint store adapter — load and conditionally persist snapshots.
//!
//! The orchestrator only talks to `CheckpointStore`. A persist is
//! conditional on the stored version still being the one the run loaded;
//! anything else is a `VersionConflict` and nothing is written.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use checkpoint_kernel::domain::Snapshot;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage could not be reached or the operation failed midway.
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    /// Another writer advanced the checkpoint since it was loaded.
    #[error("version conflict on checkpoint {checkpoint_id}: expected prior version {expected}, found {found}")]
    VersionConflict {
        checkpoint_id: String,
        expected: u64,
        found: u64,
    },
    /// Stored bytes exist but cannot be trusted.
    #[error("checkpoint {checkpoint_id} is corrupt: {reason}")]
    Corrupt {
        checkpoint_id: String,
        reason: String,
    },
    #[error("invalid checkpoint id {0:?}")]
    InvalidCheckpointId(String),
}

impl StoreError {
    /// Whether repeating the whole run may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::VersionConflict { .. }
        )
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Durable home of checkpoint snapshots, keyed by checkpoint id.
pub trait CheckpointStore {
    /// Latest snapshot, or `None` if the checkpoint was never written.
    fn load(&self, checkpoint_id: &str) -> Result<Option<Snapshot>, StoreError>;

    /// Store `snapshot` iff the stored version is still
    /// `expected_prior_version` (0 when nothing is stored).
    fn persist(
        &self,
        checkpoint_id: &str,
        snapshot: &Snapshot,
        expected_prior_version: u64,
    ) -> Result<(), StoreError>;
}

impl<S: CheckpointStore + ?Sized> CheckpointStore for Arc<S> {
    fn load(&self, checkpoint_id: &str) -> Result<Option<Snapshot>, StoreError> {
        (**self).load(checkpoint_id)
    }

    fn persist(
        &self,
        checkpoint_id: &str,
        snapshot: &Snapshot,
        expected_prior_version: u64,
    ) -> Result<(), StoreError> {
        (**self).persist(checkpoint_id, snapshot, expected_prior_version)
    }
}

/// Checkpoint ids are used as directory names: `[A-Za-z0-9_.-]+`,
/// excluding `.` and `..`.
pub fn validate_checkpoint_id(checkpoint_id: &str) -> Result<(), StoreError> {
    let ok = !checkpoint_id.is_empty()
        && checkpoint_id != "."
        && checkpoint_id != ".."
        && checkpoint_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidCheckpointId(checkpoint_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Mutex-guarded map of checkpoints. Lives as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<BTreeMap<String, Snapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored version of a checkpoint, 0 if absent.
    pub fn version(&self, checkpoint_id: &str) -> Result<u64, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .get(checkpoint_id)
            .map(|s| s.snapshot_version)
            .unwrap_or(0))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Snapshot>>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

impl CheckpointStore for InMemoryStore {
    fn load(&self, checkpoint_id: &str) -> Result<Option<Snapshot>, StoreError> {
        validate_checkpoint_id(checkpoint_id)?;
        Ok(self.lock()?.get(checkpoint_id).cloned())
    }

    fn persist(
        &self,
        checkpoint_id: &str,
        snapshot: &Snapshot,
        expected_prior_version: u64,
    ) -> Result<(), StoreError> {
        validate_checkpoint_id(checkpoint_id)?;
        let mut guard = self.lock()?;
        let found = guard
            .get(checkpoint_id)
            .map(|s| s.snapshot_version)
            .unwrap_or(0);
        if found != expected_prior_version || snapshot.snapshot_version <= found {
            return Err(StoreError::VersionConflict {
                checkpoint_id: checkpoint_id.to_string(),
                expected: expected_prior_version,
                found,
            });
        }
        guard.insert(checkpoint_id.to_string(), snapshot.clone());
        Ok(())
    }
}
