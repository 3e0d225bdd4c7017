//! Replay — rebuild a checkpoint from its history of batches.
//!
//! Delegates all merge logic to the kernel. No shortcuts, no cached state.

use checkpoint_kernel::domain::Snapshot;
use checkpoint_kernel::events::EventRecord;
use checkpoint_kernel::hashing::content_hash;
use checkpoint_kernel::merge::{merge, MergeError};

/// Fold `batches` into an empty snapshot, one merge per batch.
///
/// Returns `(final_snapshot, content_hash)`. The hash ignores
/// `snapshot_version`, so it can be compared with a stored checkpoint
/// that was built from a different batching of the same records.
pub fn rebuild_snapshot(batches: &[Vec<EventRecord>]) -> Result<(Snapshot, String), MergeError> {
    let mut snapshot = Snapshot::empty();
    for batch in batches {
        snapshot = merge(&snapshot, batch)?.snapshot;
    }
    let hash = content_hash(&snapshot);
    Ok((snapshot, hash))
}

/// Rebuild and return only the content hash.
pub fn rebuild_hash(batches: &[Vec<EventRecord>]) -> Result<String, MergeError> {
    rebuild_snapshot(batches).map(|(_, hash)| hash)
}
