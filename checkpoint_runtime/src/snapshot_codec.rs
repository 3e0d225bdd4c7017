//! Snapshot Codec — deterministic Snapshot encoder/decoder.
//!
//! Pure codec layer. No side-effects, no timestamps.
//!
//! - `encode_snapshot`:  Snapshot → JSON string
//! - `decode_snapshot`:  JSON string → Snapshot (strict, no defaults)
//! - `restore_snapshot`: decode + integrity checks
//! - `snapshot_hash`:    SHA-256 of the JSON encoding (lowercase hex)
//! - `seal_snapshot` / `open_envelope`: the on-disk envelope

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use checkpoint_kernel::domain::Snapshot;
use checkpoint_kernel::hashing::content_hash;
use checkpoint_kernel::invariants::check_snapshot;
use checkpoint_kernel::SNAPSHOT_FORMAT_VERSION;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed: {0}")]
    Serialization(String),
    /// Malformed JSON, missing fields or unknown fields.
    #[error("snapshot deserialization failed: {0}")]
    Deserialization(String),
    /// Decoded snapshot fails integrity checks.
    #[error("snapshot integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("snapshot hash mismatch: envelope says {expected}, content hashes to {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("unsupported snapshot format version {0}")]
    UnsupportedFormat(u32),
    #[error("envelope version {envelope} does not match snapshot version {snapshot}")]
    VersionMismatch { envelope: u64, snapshot: u64 },
}

// ---------------------------------------------------------------------------
// Encoder / decoder
// ---------------------------------------------------------------------------

/// Encode a Snapshot to a compact JSON string.
///
/// Sorted maps and sets make the output independent of merge order.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<String, SnapshotError> {
    serde_json::to_string(snapshot).map_err(|e| SnapshotError::Serialization(e.to_string()))
}

/// Strict decode: unknown or missing fields fail. No integrity checks;
/// use `restore_snapshot` for anything read from storage.
pub fn decode_snapshot(json: &str) -> Result<Snapshot, SnapshotError> {
    serde_json::from_str::<Snapshot>(json)
        .map_err(|e| SnapshotError::Deserialization(e.to_string()))
}

/// Decode and run integrity checks immediately.
pub fn restore_snapshot(json: &str) -> Result<Snapshot, SnapshotError> {
    let snapshot = decode_snapshot(json)?;
    check_snapshot(&snapshot).map_err(SnapshotError::IntegrityViolation)?;
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// SHA-256 of the JSON encoding. Lowercase hex string.
///
/// This guards the stored bytes against tampering. It is not the
/// kernel's `content_hash`, which ignores `snapshot_version`.
pub fn snapshot_hash(snapshot: &Snapshot) -> Result<String, SnapshotError> {
    let json = encode_snapshot(snapshot)?;
    Ok(hex_sha256(json.as_bytes()))
}

fn hex_sha256(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Snapshot on-disk format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotEnvelope {
    pub format_version: u32,
    pub snapshot_version: u64,
    /// SHA-256 of `snapshot_json`.
    pub hash: String,
    /// Kernel content hash, comparable across replays.
    pub content_hash: String,
    pub snapshot_json: String,
}

pub fn seal_snapshot(snapshot: &Snapshot) -> Result<SnapshotEnvelope, SnapshotError> {
    let snapshot_json = encode_snapshot(snapshot)?;
    Ok(SnapshotEnvelope {
        format_version: SNAPSHOT_FORMAT_VERSION,
        snapshot_version: snapshot.snapshot_version,
        hash: hex_sha256(snapshot_json.as_bytes()),
        content_hash: content_hash(snapshot),
        snapshot_json,
    })
}

/// Verify an envelope and restore the snapshot inside it.
pub fn open_envelope(envelope: &SnapshotEnvelope) -> Result<Snapshot, SnapshotError> {
    if envelope.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedFormat(envelope.format_version));
    }
    let actual = hex_sha256(envelope.snapshot_json.as_bytes());
    if actual != envelope.hash {
        return Err(SnapshotError::HashMismatch {
            expected: envelope.hash.clone(),
            actual,
        });
    }
    let snapshot = restore_snapshot(&envelope.snapshot_json)?;
    if snapshot.snapshot_version != envelope.snapshot_version {
        return Err(SnapshotError::VersionMismatch {
            envelope: envelope.snapshot_version,
            snapshot: snapshot.snapshot_version,
        });
    }
    let content = content_hash(&snapshot);
    if content != envelope.content_hash {
        return Err(SnapshotError::HashMismatch {
            expected: envelope.content_hash.clone(),
            actual: content,
        });
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use checkpoint_kernel::events::{EventRecord, Timestamp};
    use checkpoint_kernel::merge::merge;
    use serde_json::json;

    fn record(id: &str, at: i64, ptid: &str) -> EventRecord {
        let mut payload = BTreeMap::new();
        payload.insert("ptid".to_string(), json!(ptid));
        payload.insert("visit".to_string(), json!({"z": 1, "a": [true, null]}));
        EventRecord {
            event_id: id.to_string(),
            event_type: "visit".to_string(),
            occurred_at: Timestamp::from_millis(at).unwrap(),
            schema_version: 1,
            payload,
        }
    }

    fn make_test_snapshot() -> Snapshot {
        merge(&Snapshot::empty(), &[record("b", 20, "P2"), record("a", 10, "P1")])
            .unwrap()
            .snapshot
    }

    // ── Roundtrip encode → decode → encode ──────────────────────────

    #[test]
    fn roundtrip_produces_identical_json() {
        let snap = make_test_snapshot();
        let json1 = encode_snapshot(&snap).unwrap();
        let decoded = decode_snapshot(&json1).unwrap();
        assert_eq!(decoded, snap);
        assert_eq!(json1, encode_snapshot(&decoded).unwrap());
    }

    // ── Integrity violations surface on restore ─────────────────────

    #[test]
    fn record_past_watermark_is_rejected_on_restore() {
        let mut snap = make_test_snapshot();
        snap.watermark = Timestamp::from_millis(5).unwrap();
        let json = encode_snapshot(&snap).unwrap();

        assert!(decode_snapshot(&json).is_ok());
        match restore_snapshot(&json).unwrap_err() {
            SnapshotError::IntegrityViolation(msg) => assert!(msg.contains("watermark"), "{}", msg),
            other => panic!("Expected IntegrityViolation, got: {:?}", other),
        }
    }

    // ── Strict decoding ─────────────────────────────────────────────

    #[test]
    fn missing_and_unknown_fields_are_rejected() {
        assert!(matches!(
            decode_snapshot(r#"{"records":{}}"#),
            Err(SnapshotError::Deserialization(_))
        ));

        let mut v: serde_json::Value =
            serde_json::from_str(&encode_snapshot(&make_test_snapshot()).unwrap()).unwrap();
        v["extra"] = json!(1);
        assert!(matches!(
            decode_snapshot(&v.to_string()),
            Err(SnapshotError::Deserialization(_))
        ));
    }

    // ── Hashes ──────────────────────────────────────────────────────

    #[test]
    fn hash_is_deterministic() {
        let h1 = snapshot_hash(&make_test_snapshot()).unwrap();
        let h2 = snapshot_hash(&make_test_snapshot()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    // ── Envelope ────────────────────────────────────────────────────

    #[test]
    fn sealed_envelope_opens_to_same_snapshot() {
        let snap = make_test_snapshot();
        let env = seal_snapshot(&snap).unwrap();
        assert_eq!(env.snapshot_version, 1);
        assert_eq!(env.hash, snapshot_hash(&snap).unwrap());
        assert_eq!(open_envelope(&env).unwrap(), snap);
    }

    #[test]
    fn tampered_envelope_is_rejected() {
        let env = seal_snapshot(&make_test_snapshot()).unwrap();

        let mut tampered = env.clone();
        tampered.snapshot_json = tampered.snapshot_json.replace("P1", "P9");
        assert!(matches!(
            open_envelope(&tampered),
            Err(SnapshotError::HashMismatch { .. })
        ));

        let mut wrong_version = env.clone();
        wrong_version.snapshot_version = 7;
        assert!(matches!(
            open_envelope(&wrong_version),
            Err(SnapshotError::VersionMismatch { envelope: 7, snapshot: 1 })
        ));

        let mut future = env;
        future.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        assert!(matches!(
            open_envelope(&future),
            Err(SnapshotError::UnsupportedFormat(_))
        ));
    }
}
