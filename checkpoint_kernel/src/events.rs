//! Event records — the unit of input to the kernel.
//!
//! Records are pure data. They carry identity, ordering key and payload
//! only; all merge logic lives in `merge.rs`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version assumed for raw records that do not declare one.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

// ── Timestamp ──────────────────────────────────────────────────────

/// Milliseconds since the Unix epoch. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Epoch start; the watermark of an empty checkpoint.
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_millis(millis: i64) -> Option<Self> {
        (millis >= 0).then_some(Timestamp(millis))
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Parse an RFC 3339 string. A string without an offset is read as UTC.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let millis = match DateTime::parse_from_rfc3339(text) {
            Ok(dt) => dt.timestamp_millis(),
            Err(_) => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()?
                .and_utc()
                .timestamp_millis(),
        };
        Self::from_millis(millis)
    }

    /// Read a timestamp from JSON: integer milliseconds or an RFC 3339 string.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().and_then(Self::from_millis),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

// ── Schema key ─────────────────────────────────────────────────────

/// `(event_type, schema_version)`: the tag of a record shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaKey {
    pub event_type: String,
    pub schema_version: u32,
}

impl SchemaKey {
    pub fn new(event_type: impl Into<String>, schema_version: u32) -> Self {
        Self {
            event_type: event_type.into(),
            schema_version,
        }
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.event_type, self.schema_version)
    }
}

// ── Event record ───────────────────────────────────────────────────

/// One validated logical occurrence.
///
/// `event_id` is stable across re-ingestion of the same logical event,
/// which is what makes replays converge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: String,
    pub occurred_at: Timestamp,
    pub schema_version: u32,
    pub payload: BTreeMap<String, Value>,
}

impl EventRecord {
    pub fn schema_key(&self) -> SchemaKey {
        SchemaKey::new(self.event_type.clone(), self.schema_version)
    }
}

// ── Raw input ──────────────────────────────────────────────────────

/// A raw blob as delivered by the input source, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Where the blob came from (object key, file name), if known.
    pub source_key: Option<String>,
    pub bytes: Vec<u8>,
}

impl RawRecord {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source_key: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_source(source_key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source_key: Some(source_key.into()),
            bytes: bytes.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamp_accepts_integer_millis() {
        assert_eq!(Timestamp::from_value(&json!(100)), Timestamp::from_millis(100));
    }

    #[test]
    fn timestamp_rejects_negative_and_fractional() {
        assert_eq!(Timestamp::from_value(&json!(-1)), None);
        assert_eq!(Timestamp::from_value(&json!(1.5)), None);
        assert_eq!(Timestamp::from_value(&json!(true)), None);
    }

    #[test]
    fn timestamp_parses_rfc3339_and_naive_utc() {
        let with_offset = Timestamp::parse("2024-01-15T10:30:00Z").unwrap();
        let naive = Timestamp::parse("2024-01-15T10:30:00").unwrap();
        let shifted = Timestamp::parse("2024-01-15T11:30:00+01:00").unwrap();
        assert_eq!(with_offset, naive);
        assert_eq!(with_offset, shifted);
        assert_eq!(with_offset.as_millis(), 1_705_314_600_000);
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert_eq!(Timestamp::parse("yesterday"), None);
        assert_eq!(Timestamp::parse(""), None);
    }

    #[test]
    fn timestamp_display_is_rfc3339() {
        let ts = Timestamp::from_millis(1_705_314_600_000).unwrap();
        assert_eq!(ts.to_string(), "2024-01-15T10:30:00.000Z");
    }

    #[test]
    fn schema_keys_order_by_type_then_version() {
        let mut keys = vec![
            SchemaKey::new("visit", 2),
            SchemaKey::new("audit", 3),
            SchemaKey::new("visit", 1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                SchemaKey::new("audit", 3),
                SchemaKey::new("visit", 1),
                SchemaKey::new("visit", 2),
            ]
        );
    }
}
