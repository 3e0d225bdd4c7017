//! Hand-written protobuf types for the run journal.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Field numbers are part of the on-disk format; never reuse a tag.

use prost::Message;

// ── Journal entry ──────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoJournalEntry {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(message, optional, tag = "2")]
    pub summary: Option<ProtoRunSummary>,
}

// ── Run summary ────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoRunSummary {
    #[prost(string, tag = "1")]
    pub checkpoint_id: String,
    #[prost(string, tag = "2")]
    pub checkpoint_status: String,
    #[prost(uint64, tag = "3")]
    pub events_processed: u64,
    #[prost(uint64, tag = "4")]
    pub events_valid: u64,
    #[prost(uint64, tag = "5")]
    pub events_invalid: u64,
    #[prost(uint64, tag = "6")]
    pub events_backfilled: u64,
    #[prost(uint64, tag = "7")]
    pub events_merged_new: u64,
    #[prost(uint64, tag = "8")]
    pub events_merged_updated: u64,
    #[prost(uint64, tag = "9")]
    pub events_merged_skipped_stale: u64,
    #[prost(int64, tag = "10")]
    pub previous_watermark_ms: i64,
    #[prost(int64, tag = "11")]
    pub new_watermark_ms: i64,
    #[prost(uint64, tag = "12")]
    pub snapshot_version_before: u64,
    #[prost(uint64, tag = "13")]
    pub snapshot_version_after: u64,
    #[prost(message, repeated, tag = "14")]
    pub invalid_records: Vec<ProtoInvalidRecord>,
}

// ── Invalid record ─────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoInvalidRecord {
    #[prost(uint64, tag = "1")]
    pub position: u64,
    #[prost(string, optional, tag = "2")]
    pub source_key: Option<String>,
    #[prost(bytes = "vec", tag = "3")]
    pub raw_input: Vec<u8>,
    /// `malformed_structure` | `missing_required_field` | `schema_incompatible`
    #[prost(string, tag = "4")]
    pub reason_kind: String,
    #[prost(string, tag = "5")]
    pub reason_detail: String,
}
