//! Record validator — raw blobs to `Valid` / `Invalid` outcomes.
//!
//! Every input produces exactly one outcome. Nothing here returns an
//! error or panics on bad data: a malformed record becomes an
//! `InvalidRecord` and the batch carries on.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::{EventRecord, RawRecord, Timestamp, DEFAULT_SCHEMA_VERSION};
use crate::schema::{SchemaOutcome, SchemaRegistry};

/// Envelope keys a raw record may carry.
const ENVELOPE_KEYS: [&str; 5] = [
    "event_id",
    "event_type",
    "occurred_at",
    "schema_version",
    "payload",
];

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum InvalidReason {
    MalformedStructure(String),
    MissingRequiredField(String),
    SchemaIncompatible(String),
}

impl InvalidReason {
    /// Stable reason code: `malformed_structure`, `missing_required_field`
    /// or `schema_incompatible:<detail>`.
    pub fn code(&self) -> String {
        match self {
            InvalidReason::MalformedStructure(_) => "malformed_structure".to_string(),
            InvalidReason::MissingRequiredField(_) => "missing_required_field".to_string(),
            InvalidReason::SchemaIncompatible(detail) => format!("schema_incompatible:{}", detail),
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            InvalidReason::MalformedStructure(d)
            | InvalidReason::MissingRequiredField(d)
            | InvalidReason::SchemaIncompatible(d) => d,
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::SchemaIncompatible(_) => f.write_str(&self.code()),
            _ => write!(f, "{} ({})", self.code(), self.detail()),
        }
    }
}

/// A rejected input, kept for the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvalidRecord {
    /// Zero-based position in the input batch.
    pub position: usize,
    pub source_key: Option<String>,
    /// The raw input exactly as delivered.
    pub raw_input: Vec<u8>,
    pub reason: InvalidReason,
}

impl InvalidRecord {
    /// The raw input for display, with invalid UTF-8 replaced.
    pub fn raw_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_input)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid {
        record: EventRecord,
        /// Fields the registry filled in from defaults.
        backfilled: Vec<String>,
    },
    Invalid(InvalidRecord),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid { .. })
    }
}

/// The fold of a whole batch: two ordered sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedBatch {
    /// Valid records in original input order.
    pub valid: Vec<EventRecord>,
    pub invalid: Vec<InvalidRecord>,
    /// Valid records that needed at least one default backfilled.
    pub backfilled: u64,
}

impl ValidatedBatch {
    pub fn processed(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Applies a schema registry to raw input.
#[derive(Debug, Clone)]
pub struct RecordValidator {
    registry: Arc<SchemaRegistry>,
}

/// Envelope fields after the structural parse, before presence checks.
struct Envelope {
    event_id: Option<String>,
    event_type: Option<String>,
    occurred_at: Option<Timestamp>,
    schema_version: u32,
    payload: Map<String, Value>,
}

impl RecordValidator {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Validate one raw record found at `position` in its batch.
    pub fn validate(&self, raw: &RawRecord, position: usize) -> ValidationOutcome {
        let invalid = |reason: InvalidReason| {
            ValidationOutcome::Invalid(InvalidRecord {
                position,
                source_key: raw.source_key.clone(),
                raw_input: raw.bytes.clone(),
                reason,
            })
        };

        // Step 1: structure
        let envelope = match parse_envelope(&raw.bytes) {
            Ok(env) => env,
            Err(detail) => return invalid(InvalidReason::MalformedStructure(detail)),
        };

        // Step 2: required fields
        let (event_id, event_type, occurred_at) =
            match (envelope.event_id, envelope.event_type, envelope.occurred_at) {
                (Some(id), Some(ty), Some(ts)) => (id, ty, ts),
                (None, _, _) => {
                    return invalid(InvalidReason::MissingRequiredField("event_id".to_string()))
                }
                (_, None, _) => {
                    return invalid(InvalidReason::MissingRequiredField("event_type".to_string()))
                }
                (_, _, None) => {
                    return invalid(InvalidReason::MissingRequiredField(
                        "occurred_at".to_string(),
                    ))
                }
            };

        // Step 3: schema
        let (payload, backfilled) =
            match self
                .registry
                .classify(&event_type, envelope.schema_version, &envelope.payload)
            {
                SchemaOutcome::Compatible(payload) => (payload, Vec::new()),
                SchemaOutcome::CompatibleWithDefaults {
                    payload,
                    missing_fields,
                } => (payload, missing_fields),
                SchemaOutcome::Incompatible(detail) => {
                    return invalid(InvalidReason::SchemaIncompatible(detail))
                }
            };

        ValidationOutcome::Valid {
            record: EventRecord {
                event_id,
                event_type,
                occurred_at,
                schema_version: envelope.schema_version,
                payload: payload.into_iter().collect::<BTreeMap<_, _>>(),
            },
            backfilled,
        }
    }

    /// Validate a batch, folding outcomes into valid and invalid sequences.
    pub fn validate_batch(&self, raws: &[RawRecord]) -> ValidatedBatch {
        raws.iter()
            .enumerate()
            .fold(ValidatedBatch::default(), |mut batch, (position, raw)| {
                match self.validate(raw, position) {
                    ValidationOutcome::Valid { record, backfilled } => {
                        if !backfilled.is_empty() {
                            batch.backfilled += 1;
                        }
                        batch.valid.push(record);
                    }
                    ValidationOutcome::Invalid(rec) => batch.invalid.push(rec),
                }
                batch
            })
    }
}

// ---------------------------------------------------------------------------
// Structural parse (private)
// ---------------------------------------------------------------------------

fn parse_envelope(bytes: &[u8]) -> Result<Envelope, String> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {}", e))?;
    let Value::Object(mut obj) = value else {
        return Err("record is not a JSON object".to_string());
    };

    if let Some(key) = obj.keys().find(|k| !ENVELOPE_KEYS.contains(&k.as_str())) {
        return Err(format!("unexpected key {:?}", key));
    }

    let event_id = optional_string(&obj, "event_id")?;
    let event_type = optional_string(&obj, "event_type")?;

    let occurred_at = match obj.get("occurred_at") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(
            Timestamp::from_value(v)
                .ok_or_else(|| format!("occurred_at {} is not a valid timestamp", v))?,
        ),
    };

    let schema_version = match obj.get("schema_version") {
        None | Some(Value::Null) => DEFAULT_SCHEMA_VERSION,
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("schema_version {} is not a positive integer", v))?,
    };

    let payload = match obj.remove("payload") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m,
        Some(_) => return Err("payload is not a JSON object".to_string()),
    };

    Ok(Envelope {
        event_id,
        event_type,
        occurred_at,
        schema_version,
        payload,
    })
}

/// A string envelope field: absent or blank is `None`, non-string is an error.
fn optional_string(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(_) => Err(format!("{} is not a string", key)),
    }
}
