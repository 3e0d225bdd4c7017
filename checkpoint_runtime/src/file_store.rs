//! File-backed checkpoint store.
//!
//! Layout:
//!   <root>/<checkpoint_id>/snapshot_000001.json
//!   <root>/<checkpoint_id>/snapshot_000002.json
//!
//! Each file is a `SnapshotEnvelope`. The highest-numbered file is the
//! current checkpoint. A new version is written to a temp file, fsynced,
//! then hard-linked into place. The link is the commit point: it fails if
//! that version already exists, and once it succeeds the new version is
//! what `load` returns.
//!
//! After linking, the directory is re-scanned. If a higher version is
//! already present (another writer got further while retention pruned the
//! slot this one linked into), the new file is removed again and the
//! persist reports a `VersionConflict`. A failed directory fsync after the
//! commit point is logged, not returned.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use checkpoint_kernel::domain::Snapshot;

use crate::snapshot_codec::{open_envelope, seal_snapshot, SnapshotEnvelope};
use crate::store::{validate_checkpoint_id, CheckpointStore, StoreError};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
    /// Snapshot files kept per checkpoint; 0 keeps all.
    keep_snapshots: usize,
    dir_sync: fn(&Path) -> io::Result<()>,
}

impl fmt::Debug for FileCheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCheckpointStore")
            .field("root", &self.root)
            .field("keep_snapshots", &self.keep_snapshots)
            .finish()
    }
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_snapshots: 0,
            dir_sync: sync_dir,
        }
    }

    pub fn with_retention(mut self, keep_snapshots: usize) -> Self {
        self.keep_snapshots = keep_snapshots;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoint_dir(&self, checkpoint_id: &str) -> Result<PathBuf, StoreError> {
        validate_checkpoint_id(checkpoint_id)?;
        Ok(self.root.join(checkpoint_id))
    }

    /// Stored snapshot versions of a checkpoint, ascending.
    pub fn versions(&self, checkpoint_id: &str) -> Result<Vec<u64>, StoreError> {
        let dir = self.checkpoint_dir(checkpoint_id)?;
        Ok(list_versions(&dir)?)
    }

    /// Load one specific stored version.
    pub fn load_version(
        &self,
        checkpoint_id: &str,
        version: u64,
    ) -> Result<Option<Snapshot>, StoreError> {
        let dir = self.checkpoint_dir(checkpoint_id)?;
        let path = snapshot_path(&dir, version);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let corrupt = |reason: String| StoreError::Corrupt {
            checkpoint_id: checkpoint_id.to_string(),
            reason: format!("{}: {}", path.display(), reason),
        };
        let envelope: SnapshotEnvelope =
            serde_json::from_str(&content).map_err(|e| corrupt(format!("bad envelope: {}", e)))?;
        let snapshot = open_envelope(&envelope).map_err(|e| corrupt(e.to_string()))?;
        if snapshot.snapshot_version != version {
            return Err(corrupt(format!(
                "file holds snapshot version {}",
                snapshot.snapshot_version
            )));
        }
        Ok(Some(snapshot))
    }

    fn prune(&self, checkpoint_id: &str, dir: &Path) {
        if self.keep_snapshots == 0 {
            return;
        }
        let versions = match list_versions(dir) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(checkpoint_id, error = %e, "snapshot retention scan failed");
                return;
            }
        };
        let excess = versions.len().saturating_sub(self.keep_snapshots);
        for version in &versions[..excess] {
            if let Err(e) = fs::remove_file(snapshot_path(dir, *version)) {
                tracing::warn!(checkpoint_id, version, error = %e, "failed to prune old snapshot");
            }
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, checkpoint_id: &str) -> Result<Option<Snapshot>, StoreError> {
        let dir = self.checkpoint_dir(checkpoint_id)?;
        match list_versions(&dir)?.last() {
            Some(&latest) => self.load_version(checkpoint_id, latest),
            None => Ok(None),
        }
    }

    fn persist(
        &self,
        checkpoint_id: &str,
        snapshot: &Snapshot,
        expected_prior_version: u64,
    ) -> Result<(), StoreError> {
        let dir = self.checkpoint_dir(checkpoint_id)?;
        fs::create_dir_all(&dir)?;

        let found = list_versions(&dir)?.last().copied().unwrap_or(0);
        let conflict = |found: u64| StoreError::VersionConflict {
            checkpoint_id: checkpoint_id.to_string(),
            expected: expected_prior_version,
            found,
        };
        if found != expected_prior_version || snapshot.snapshot_version <= found {
            return Err(conflict(found));
        }

        self.publish(checkpoint_id, &dir, snapshot, expected_prior_version)?;
        self.prune(checkpoint_id, &dir);
        Ok(())
    }
}

impl FileCheckpointStore {
    /// Write, link and confirm one version. The caller has already checked
    /// the prior version.
    fn publish(
        &self,
        checkpoint_id: &str,
        dir: &Path,
        snapshot: &Snapshot,
        expected_prior_version: u64,
    ) -> Result<(), StoreError> {
        let version = snapshot.snapshot_version;
        let conflict = |found: u64| StoreError::VersionConflict {
            checkpoint_id: checkpoint_id.to_string(),
            expected: expected_prior_version,
            found,
        };

        let envelope = seal_snapshot(snapshot).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let content = serde_json::to_string(&envelope)
            .map_err(|e| StoreError::Unavailable(format!("envelope serialization failed: {}", e)))?;

        let temp = dir.join(format!(
            ".snapshot_{:06}.{}.{}.tmp",
            version,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let target = snapshot_path(dir, version);
        let written = write_synced(&temp, content.as_bytes());
        let linked = written.and_then(|()| fs::hard_link(&temp, &target));
        let _ = fs::remove_file(&temp);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(conflict(version)),
            Err(e) => return Err(e.into()),
        }

        let latest = list_versions(dir)?.last().copied().unwrap_or(version);
        if latest > version {
            if let Err(e) = fs::remove_file(&target) {
                tracing::warn!(checkpoint_id, version, error = %e, "failed to withdraw superseded snapshot");
            }
            return Err(conflict(latest));
        }

        if let Err(e) = (self.dir_sync)(dir) {
            tracing::warn!(checkpoint_id, version, error = %e, "directory fsync failed after snapshot commit");
        }

        tracing::debug!(
            checkpoint_id,
            snapshot_version = version,
            hash = %envelope.hash,
            "snapshot persisted"
        );
        Ok(())
    }
}

fn snapshot_path(dir: &Path, version: u64) -> PathBuf {
    dir.join(format!("snapshot_{:06}.json", version))
}

/// Scan for snapshot_NNNNNN.json files. Missing directory means none.
fn list_versions(dir: &Path) -> io::Result<Vec<u64>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut versions = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if let Some(version) = name_str
            .strip_prefix("snapshot_")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse::<u64>().ok())
        {
            versions.push(version);
        }
    }
    versions.sort_unstable();
    Ok(versions)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
