//! Canonical hashing.
//!
//! Deterministic canonical serialization + SHA-256 hashing.
//!
//! Rules:
//!   - Payload object keys sorted (UTF-8 byte order), at every depth
//!   - Records sorted by event_id, schema keys sorted by (type, version)
//!   - UTF-8 JSON, no whitespace
//!   - Fixed top-level field order, `format_version` first

use sha2::{Digest, Sha256};
use serde_json::{Map, Value};

use crate::domain::Snapshot;
use crate::events::EventRecord;
use crate::SNAPSHOT_FORMAT_VERSION;

/// Canonical serialization of a snapshot to UTF-8 JSON bytes.
pub fn canonical_serialize(snapshot: &Snapshot) -> Vec<u8> {
    let mut root = Map::new();
    root.insert(
        "format_version".to_string(),
        Value::from(SNAPSHOT_FORMAT_VERSION),
    );
    root.insert(
        "snapshot_version".to_string(),
        Value::from(snapshot.snapshot_version),
    );
    append_content(&mut root, snapshot);
    Value::Object(root).to_string().into_bytes()
}

/// SHA-256 of the canonical serialization. Lowercase hex.
pub fn canonical_hash(snapshot: &Snapshot) -> String {
    hex_digest(&canonical_serialize(snapshot))
}

/// SHA-256 of the snapshot's content, ignoring `snapshot_version`.
///
/// Two runs that converge to the same records, watermark and seen
/// schema set produce the same content hash.
pub fn content_hash(snapshot: &Snapshot) -> String {
    let mut root = Map::new();
    root.insert(
        "format_version".to_string(),
        Value::from(SNAPSHOT_FORMAT_VERSION),
    );
    append_content(&mut root, snapshot);
    hex_digest(Value::Object(root).to_string().as_bytes())
}

/// SHA-256 of one record in canonical form.
pub fn record_digest(record: &EventRecord) -> String {
    hex_digest(canonical_record(record).to_string().as_bytes())
}

/// Recursively rebuild a JSON value with sorted object keys.
///
/// `serde_json` runs with `preserve_order`, so maps otherwise keep
/// whatever order the producer used.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn canonical_record(r: &EventRecord) -> Value {
    let mut payload = Map::new();
    // BTreeMap iterates in key order
    for (k, v) in &r.payload {
        payload.insert(k.clone(), canonicalize(v));
    }

    let mut map = Map::new();
    map.insert("event_id".to_string(), Value::String(r.event_id.clone()));
    map.insert("event_type".to_string(), Value::String(r.event_type.clone()));
    map.insert("occurred_at".to_string(), Value::from(r.occurred_at.as_millis()));
    map.insert("payload".to_string(), Value::Object(payload));
    map.insert("schema_version".to_string(), Value::from(r.schema_version));
    Value::Object(map)
}

fn append_content(root: &mut Map<String, Value>, snapshot: &Snapshot) {
    let records: Vec<Value> = snapshot.records.values().map(canonical_record).collect();

    let seen: Vec<Value> = snapshot
        .schema_versions_seen
        .iter()
        .map(|key| {
            let mut m = Map::new();
            m.insert("event_type".to_string(), Value::String(key.event_type.clone()));
            m.insert("schema_version".to_string(), Value::from(key.schema_version));
            Value::Object(m)
        })
        .collect();

    root.insert("records".to_string(), Value::Array(records));
    root.insert(
        "watermark".to_string(),
        Value::from(snapshot.watermark.as_millis()),
    );
    root.insert("schema_versions_seen".to_string(), Value::Array(seen));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Timestamp;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(payload: Value) -> EventRecord {
        EventRecord {
            event_id: "e1".to_string(),
            event_type: "visit".to_string(),
            occurred_at: Timestamp::from_millis(5).unwrap(),
            schema_version: 1,
            payload: serde_json::from_value::<BTreeMap<String, Value>>(payload).unwrap(),
        }
    }

    #[test]
    fn nested_key_order_does_not_change_digest() {
        let a = record(serde_json::from_str(r#"{"meta": {"b": 1, "a": 2}}"#).unwrap());
        let b = record(serde_json::from_str(r#"{"meta": {"a": 2, "b": 1}}"#).unwrap());
        assert_eq!(record_digest(&a), record_digest(&b));
    }

    #[test]
    fn different_payloads_have_different_digests() {
        let a = record(json!({"ptid": "P1"}));
        let b = record(json!({"ptid": "P2"}));
        assert_ne!(record_digest(&a), record_digest(&b));
    }

    #[test]
    fn content_hash_ignores_snapshot_version() {
        let mut s = Snapshot::empty();
        s.records.insert("e1".to_string(), record(json!({})));
        let h1 = content_hash(&s);
        let c1 = canonical_hash(&s);
        s.snapshot_version = 9;
        assert_eq!(content_hash(&s), h1);
        assert_ne!(canonical_hash(&s), c1);
        assert_eq!(h1.len(), 64);
    }
}
