//! Merge property tests — replay safety and ordering guarantees.
//!
//! Each test builds its batch through the validator so the records are
//! exactly what a run would merge.

use std::sync::Arc;

use serde_json::{json, Value};

use checkpoint_kernel::domain::Snapshot;
use checkpoint_kernel::events::{EventRecord, RawRecord};
use checkpoint_kernel::hashing::content_hash;
use checkpoint_kernel::merge::merge;
use checkpoint_kernel::schema::{FieldSpec, FieldType, SchemaDefinition, SchemaRegistry};
use checkpoint_kernel::validator::{RecordValidator, ValidationOutcome};

fn registry() -> Arc<SchemaRegistry> {
    let mut defs = Vec::new();
    for version in 1..=3 {
        let mut def = SchemaDefinition::new("X", version)
            .field("ptid", FieldSpec::required(FieldType::String));
        if version >= 2 {
            def = def.field(
                "study",
                FieldSpec::required(FieldType::String).with_default(json!("adrc")),
            );
        }
        if version >= 3 {
            def = def.field("packet", FieldSpec::optional(FieldType::String));
        }
        defs.push(def);
    }
    Arc::new(SchemaRegistry::new(defs).expect("valid registry"))
}

fn raw(v: Value) -> RawRecord {
    RawRecord::new(serde_json::to_vec(&v).expect("serializable"))
}

fn event(id: &str, at: i64, version: u32, ptid: &str) -> RawRecord {
    raw(json!({
        "event_id": id,
        "event_type": "X",
        "occurred_at": at,
        "schema_version": version,
        "payload": {"ptid": ptid},
    }))
}

fn valid_records(raws: &[RawRecord]) -> Vec<EventRecord> {
    RecordValidator::new(registry()).validate_batch(raws).valid
}

/// Every permutation of `items` (Heap's algorithm).
fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    fn heap<T: Clone>(k: usize, items: &mut Vec<T>, out: &mut Vec<Vec<T>>) {
        if k <= 1 {
            out.push(items.clone());
            return;
        }
        heap(k - 1, items, out);
        for i in 0..k - 1 {
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
            heap(k - 1, items, out);
        }
    }
    let mut work = items.to_vec();
    let mut out = Vec::new();
    heap(work.len(), &mut work, &mut out);
    out
}

/// Batch mixing new ids, duplicates, late arrivals and ties.
fn mixed_batch() -> Vec<EventRecord> {
    valid_records(&[
        event("e1", 100, 1, "A"),
        event("e1", 100, 2, "A"),
        event("e2", 50, 1, "B"),
        event("e2", 70, 1, "C"),
        event("e3", 10, 3, "D"),
        event("e3", 10, 3, "E"),
    ])
}

fn seeded_prior() -> Snapshot {
    merge(
        &Snapshot::empty(),
        &valid_records(&[event("e2", 60, 1, "prior"), event("e9", 5, 1, "Z")]),
    )
    .expect("merge")
    .snapshot
}

// ─────────────────────────────────────────────────────────────
// Idempotent replay
// ─────────────────────────────────────────────────────────────

#[test]
fn reapplying_a_batch_is_a_no_op() {
    let prior = seeded_prior();
    let batch = mixed_batch();

    let once = merge(&prior, &batch).expect("first merge").snapshot;
    let twice = merge(&once, &batch).expect("second merge");

    assert!(twice.snapshot.same_content(&once));
    assert_eq!(content_hash(&twice.snapshot), content_hash(&once));
    assert_eq!(twice.counts.merged_new, 0);
    assert_eq!(twice.counts.merged_updated, 0);
    assert_eq!(twice.counts.merged_skipped_stale, batch.len() as u64);
}

// ─────────────────────────────────────────────────────────────
// Order independence
// ─────────────────────────────────────────────────────────────

#[test]
fn every_permutation_converges() {
    let prior = seeded_prior();
    let batch = mixed_batch();
    let expected = merge(&prior, &batch).expect("merge").snapshot;

    let perms = permutations(&batch);
    assert_eq!(perms.len(), 720);
    for perm in perms {
        let got = merge(&prior, &perm).expect("merge").snapshot;
        assert_eq!(got, expected, "permutation diverged: {:?}", perm);
    }
}

#[test]
fn split_batches_converge_with_single_batch() {
    let batch = mixed_batch();
    let whole = merge(&Snapshot::empty(), &batch).expect("merge").snapshot;

    let (head, tail) = batch.split_at(3);
    let first = merge(&Snapshot::empty(), tail).expect("merge").snapshot;
    let second = merge(&first, head).expect("merge").snapshot;

    assert!(second.same_content(&whole));
}

// ─────────────────────────────────────────────────────────────
// Monotonic watermark
// ─────────────────────────────────────────────────────────────

#[test]
fn watermark_is_monotonic() {
    let prior = seeded_prior();
    for batch in [
        valid_records(&[event("late", 1, 1, "L")]),
        valid_records(&[]),
        mixed_batch(),
    ] {
        let next = merge(&prior, &batch).expect("merge").snapshot;
        assert!(next.watermark >= prior.watermark);
    }
}

// ─────────────────────────────────────────────────────────────
// No data loss on partial invalidity
// ─────────────────────────────────────────────────────────────

#[test]
fn only_valid_records_are_merged() {
    let raws = vec![
        event("a", 1, 1, "A"),
        RawRecord::new(&b"not json"[..]),
        event("b", 2, 1, "B"),
        raw(json!({"event_id": "c", "event_type": "X", "occurred_at": 3, "payload": {}})),
        raw(json!({"event_type": "X", "occurred_at": 3, "payload": {"ptid": "Q"}})),
        event("d", 4, 1, "D"),
    ];
    let batch = RecordValidator::new(registry()).validate_batch(&raws);
    assert_eq!(batch.invalid.len(), 3);
    assert_eq!(batch.valid.len(), 3);

    let out = merge(&Snapshot::empty(), &batch.valid).expect("merge");
    let ids: Vec<&str> = out.snapshot.records.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["a", "b", "d"]);
}

// ─────────────────────────────────────────────────────────────
// Conflict resolution determinism
// ─────────────────────────────────────────────────────────────

#[test]
fn higher_schema_version_wins_same_instant_in_every_order() {
    let batch = valid_records(&[
        event("e1", 100, 1, "v1"),
        event("e1", 100, 3, "v3"),
        event("e1", 100, 2, "v2"),
    ]);
    for perm in permutations(&batch) {
        let snap = merge(&Snapshot::empty(), &perm).expect("merge").snapshot;
        let stored = snap.get("e1").expect("e1 stored");
        assert_eq!(stored.schema_version, 3);
        assert_eq!(stored.payload["ptid"], json!("v3"));
    }
}

// ─────────────────────────────────────────────────────────────
// Empty prior, three distinct records
// ─────────────────────────────────────────────────────────────

#[test]
fn empty_prior_takes_three_new_records() {
    let batch = valid_records(&[event("a", 1, 1, "A"), event("b", 2, 2, "B"), event("c", 3, 3, "C")]);
    let out = merge(&Snapshot::empty(), &batch).expect("merge");
    assert_eq!(out.snapshot.len(), 3);
    assert_eq!(out.counts.merged_new, 3);
    assert_eq!(out.counts.merged_updated, 0);
    assert_eq!(out.snapshot.schema_versions_seen.len(), 3);
}

// ─────────────────────────────────────────────────────────────
// Late arrival is stale
// ─────────────────────────────────────────────────────────────

#[test]
fn late_record_is_skipped() {
    let prior = merge(&Snapshot::empty(), &valid_records(&[event("e1", 100, 1, "current")]))
        .expect("merge")
        .snapshot;
    let out = merge(&prior, &valid_records(&[event("e1", 90, 1, "older")])).expect("merge");

    assert_eq!(out.counts.merged_skipped_stale, 1);
    assert_eq!(out.snapshot.get("e1"), prior.get("e1"));
    assert_eq!(out.snapshot.watermark.as_millis(), 100);
}

// ─────────────────────────────────────────────────────────────
// Unknown schema version is rejected
// ─────────────────────────────────────────────────────────────

#[test]
fn unknown_schema_version_leaves_prior_untouched() {
    let prior = merge(&Snapshot::empty(), &valid_records(&[event("e1", 100, 1, "current")]))
        .expect("merge")
        .snapshot;

    let validator = RecordValidator::new(registry());
    let outcome = validator.validate(&event("e1", 500, 5, "future"), 0);
    let ValidationOutcome::Invalid(invalid) = outcome else {
        panic!("version 5 must be rejected");
    };
    assert!(invalid.reason.code().starts_with("schema_incompatible:"));

    let batch = validator.validate_batch(&[event("e1", 500, 5, "future")]);
    let out = merge(&prior, &batch.valid).expect("merge");
    assert_eq!(out.snapshot.get("e1"), prior.get("e1"));
}

// ─────────────────────────────────────────────────────────────
// Schema evolution: old records merge under a newer shape
// ─────────────────────────────────────────────────────────────

#[test]
fn old_format_records_are_backfilled_and_recorded() {
    let batch = RecordValidator::new(registry()).validate_batch(&[event("old", 5, 1, "P")]);
    assert_eq!(batch.backfilled, 1);

    let out = merge(&Snapshot::empty(), &batch.valid).expect("merge");
    let stored = out.snapshot.get("old").expect("stored");
    assert_eq!(stored.payload["study"], json!("adrc"));
    assert_eq!(stored.payload["packet"], Value::Null);
    assert_eq!(stored.schema_version, 1);
    assert!(out
        .snapshot
        .schema_versions_seen
        .iter()
        .any(|k| k.event_type == "X" && k.schema_version == 1));
}
