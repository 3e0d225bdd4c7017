//! Proto ↔ RunSummary conversion bridge.
//!
//! Converts between the journal's protobuf wire types (proto_types.rs)
//! and the runtime's `RunSummary`.

use checkpoint_kernel::events::Timestamp;
use checkpoint_kernel::validator::{InvalidReason, InvalidRecord};

use crate::proto_types::*;
use crate::summary::{CheckpointStatus, RunSummary};

/// Convert a run summary to its protobuf form.
pub fn summary_to_proto(summary: &RunSummary) -> ProtoRunSummary {
    ProtoRunSummary {
        checkpoint_id: summary.checkpoint_id.clone(),
        checkpoint_status: summary.checkpoint_status.as_str().to_string(),
        events_processed: summary.events_processed,
        events_valid: summary.events_valid,
        events_invalid: summary.events_invalid,
        events_backfilled: summary.events_backfilled,
        events_merged_new: summary.events_merged_new,
        events_merged_updated: summary.events_merged_updated,
        events_merged_skipped_stale: summary.events_merged_skipped_stale,
        previous_watermark_ms: summary.previous_watermark.as_millis(),
        new_watermark_ms: summary.new_watermark.as_millis(),
        snapshot_version_before: summary.snapshot_version_before,
        snapshot_version_after: summary.snapshot_version_after,
        invalid_records: summary.invalid_records.iter().map(invalid_to_proto).collect(),
    }
}

/// Convert a protobuf summary back. Fails on values no summary can hold.
pub fn proto_to_summary(proto: &ProtoRunSummary) -> Result<RunSummary, String> {
    let checkpoint_status = CheckpointStatus::parse(&proto.checkpoint_status)
        .ok_or_else(|| format!("unknown checkpoint_status {:?}", proto.checkpoint_status))?;
    let watermark = |ms: i64| {
        Timestamp::from_millis(ms).ok_or_else(|| format!("negative watermark {}", ms))
    };
    let invalid_records = proto
        .invalid_records
        .iter()
        .map(proto_to_invalid)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RunSummary {
        checkpoint_id: proto.checkpoint_id.clone(),
        checkpoint_status,
        events_processed: proto.events_processed,
        events_valid: proto.events_valid,
        events_invalid: proto.events_invalid,
        events_backfilled: proto.events_backfilled,
        events_merged_new: proto.events_merged_new,
        events_merged_updated: proto.events_merged_updated,
        events_merged_skipped_stale: proto.events_merged_skipped_stale,
        previous_watermark: watermark(proto.previous_watermark_ms)?,
        new_watermark: watermark(proto.new_watermark_ms)?,
        snapshot_version_before: proto.snapshot_version_before,
        snapshot_version_after: proto.snapshot_version_after,
        invalid_records,
    })
}

fn invalid_to_proto(rec: &InvalidRecord) -> ProtoInvalidRecord {
    let kind = match rec.reason {
        InvalidReason::MalformedStructure(_) => "malformed_structure",
        InvalidReason::MissingRequiredField(_) => "missing_required_field",
        InvalidReason::SchemaIncompatible(_) => "schema_incompatible",
    };
    ProtoInvalidRecord {
        position: rec.position as u64,
        source_key: rec.source_key.clone(),
        raw_input: rec.raw_input.clone(),
        reason_kind: kind.to_string(),
        reason_detail: rec.reason.detail().to_string(),
    }
}

fn proto_to_invalid(proto: &ProtoInvalidRecord) -> Result<InvalidRecord, String> {
    let detail = proto.reason_detail.clone();
    let reason = match proto.reason_kind.as_str() {
        "malformed_structure" => InvalidReason::MalformedStructure(detail),
        "missing_required_field" => InvalidReason::MissingRequiredField(detail),
        "schema_incompatible" => InvalidReason::SchemaIncompatible(detail),
        other => return Err(format!("unknown invalid reason kind {:?}", other)),
    };
    let position = usize::try_from(proto.position)
        .map_err(|_| format!("position {} out of range", proto.position))?;
    Ok(InvalidRecord {
        position,
        source_key: proto.source_key.clone(),
        raw_input: proto.raw_input.clone(),
        reason,
    })
}
