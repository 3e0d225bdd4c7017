//! Snapshot integrity checks.
//!
//! A snapshot that fails any check is structurally corrupt and must not
//! be merged into. Each check returns `Err(message)` on the first failure.

use crate::domain::Snapshot;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all integrity checks. Returns the first failure.
pub fn check_snapshot(snapshot: &Snapshot) -> Result<(), String> {
    check_record_keys(snapshot)?;
    check_watermark_covers_records(snapshot)?;
    check_schema_versions_recorded(snapshot)?;
    check_unversioned_is_empty(snapshot)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Individual checks (private)
// ---------------------------------------------------------------------------

/// Every record is stored under its own, non-empty event_id.
fn check_record_keys(snapshot: &Snapshot) -> Result<(), String> {
    for (key, record) in &snapshot.records {
        if key.is_empty() {
            return Err("[INTEGRITY:record_keys] record stored under an empty event_id".to_string());
        }
        if *key != record.event_id {
            return Err(format!(
                "[INTEGRITY:record_keys] record {:?} stored under key {:?}",
                record.event_id, key
            ));
        }
    }
    Ok(())
}

/// The watermark is at least every stored occurred_at.
fn check_watermark_covers_records(snapshot: &Snapshot) -> Result<(), String> {
    match snapshot
        .records
        .values()
        .find(|r| r.occurred_at > snapshot.watermark)
    {
        Some(r) => Err(format!(
            "[INTEGRITY:watermark] record {:?} at {} is past watermark {}",
            r.event_id, r.occurred_at, snapshot.watermark
        )),
        None => Ok(()),
    }
}

/// Every stored record's shape is in schema_versions_seen.
fn check_schema_versions_recorded(snapshot: &Snapshot) -> Result<(), String> {
    for record in snapshot.records.values() {
        let key = record.schema_key();
        if !snapshot.schema_versions_seen.contains(&key) {
            return Err(format!(
                "[INTEGRITY:schema_versions_seen] record {:?} has unrecorded shape {}",
                record.event_id, key
            ));
        }
    }
    Ok(())
}

/// Version 0 is the never-merged checkpoint; it holds nothing.
fn check_unversioned_is_empty(snapshot: &Snapshot) -> Result<(), String> {
    if snapshot.snapshot_version == 0 && !snapshot.records.is_empty() {
        return Err(format!(
            "[INTEGRITY:snapshot_version] version 0 snapshot holds {} records",
            snapshot.records.len()
        ));
    }
    Ok(())
}
