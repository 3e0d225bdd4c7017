//! Schema registry — classification of record shapes.
//!
//! Shapes are keyed by `(event_type, schema_version)`. Each registered
//! version carries an explicit field table: type, requiredness and the
//! default used to backfill records written under an older shape.
//!
//! The registry is built once from its definitions and never mutated.
//! Classification is a pure function over those definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::events::Timestamp;

// ── Definitions ────────────────────────────────────────────────────

/// Value type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Object,
    Array,
    Any,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

impl FieldType {
    /// Coerce a JSON value into this type, or `None` if it cannot be.
    ///
    /// Null is never coerced here; optionality is the caller's concern.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => None,
            (FieldType::Any, v) => Some(v.clone()),
            (FieldType::String, Value::String(s)) => Some(Value::String(s.trim().to_string())),
            (FieldType::Integer, Value::Number(n)) => n.as_i64().map(Value::from),
            (FieldType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (FieldType::Float, Value::Number(n)) => Some(Value::Number(n.clone())),
            (FieldType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (FieldType::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
            (FieldType::Boolean, Value::String(s)) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (FieldType::Timestamp, v @ (Value::String(_) | Value::Number(_))) => {
                Timestamp::from_value(v).map(|_| v.clone())
            }
            (FieldType::Object, v @ Value::Object(_)) => Some(v.clone()),
            (FieldType::Array, v @ Value::Array(_)) => Some(v.clone()),
            _ => None,
        }
    }
}

fn default_required() -> bool {
    true
}

/// One field in a registered shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Backfill value for records that lack this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Closed set of permitted string values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl FieldSpec {
    pub fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            default: None,
            allowed: None,
        }
    }

    pub fn optional(field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(field_type)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// A field that may be absent from a record and filled in.
    pub fn is_defaultable(&self) -> bool {
        !self.required || self.default.is_some()
    }

    fn backfill_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }

    fn permits(&self, value: &Value) -> bool {
        match (&self.allowed, value) {
            (None, _) => true,
            (Some(_), Value::Null) => true,
            (Some(allowed), Value::String(s)) => allowed.iter().any(|a| a == s),
            (Some(_), _) => false,
        }
    }
}

/// A registered shape: one `(event_type, version)` and its field table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDefinition {
    pub event_type: String,
    pub version: u32,
    pub fields: BTreeMap<String, FieldSpec>,
}

impl SchemaDefinition {
    pub fn new(event_type: impl Into<String>, version: u32) -> Self {
        Self {
            event_type: event_type.into(),
            version,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }
}

// ── Outcome ────────────────────────────────────────────────────────

/// Result of classifying a payload against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOutcome {
    /// Field set matches the registered shape exactly. Values coerced.
    Compatible(Map<String, Value>),
    /// Fields were missing but defaultable; `payload` has them backfilled.
    CompatibleWithDefaults {
        payload: Map<String, Value>,
        missing_fields: Vec<String>,
    },
    Incompatible(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate schema definition for {event_type}@{version}")]
    Duplicate { event_type: String, version: u32 },
    #[error("schema {event_type} declares version 0; versions start at 1")]
    ZeroVersion { event_type: String },
    #[error("schema definition has an empty event_type")]
    EmptyEventType,
    #[error("default for {event_type}@{version}.{field} does not satisfy its field type")]
    InvalidDefault {
        event_type: String,
        version: u32,
        field: String,
    },
}

// ── Registry ───────────────────────────────────────────────────────

/// Immutable set of registered shapes, grouped by event type.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, BTreeMap<u32, SchemaDefinition>>,
}

impl SchemaRegistry {
    /// Build a registry, rejecting inconsistent definitions.
    pub fn new(definitions: Vec<SchemaDefinition>) -> Result<Self, RegistryError> {
        let mut schemas: BTreeMap<String, BTreeMap<u32, SchemaDefinition>> = BTreeMap::new();

        for def in definitions {
            if def.event_type.trim().is_empty() {
                return Err(RegistryError::EmptyEventType);
            }
            if def.version == 0 {
                return Err(RegistryError::ZeroVersion {
                    event_type: def.event_type,
                });
            }
            for (name, spec) in &def.fields {
                let bad_default = match &spec.default {
                    None | Some(Value::Null) => false,
                    Some(v) => spec.field_type.coerce(v).is_none() || !spec.permits(v),
                };
                if bad_default {
                    return Err(RegistryError::InvalidDefault {
                        event_type: def.event_type.clone(),
                        version: def.version,
                        field: name.clone(),
                    });
                }
            }

            let versions = schemas.entry(def.event_type.clone()).or_default();
            if versions.contains_key(&def.version) {
                return Err(RegistryError::Duplicate {
                    event_type: def.event_type,
                    version: def.version,
                });
            }
            versions.insert(def.version, def);
        }

        Ok(Self { schemas })
    }

    pub fn get(&self, event_type: &str, version: u32) -> Option<&SchemaDefinition> {
        self.schemas.get(event_type)?.get(&version)
    }

    /// Newest registered version of an event type.
    pub fn latest_version(&self, event_type: &str) -> Option<u32> {
        self.schemas.get(event_type)?.keys().next_back().copied()
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Classify a payload against the shape registered for
    /// `(event_type, schema_version)`.
    ///
    /// Missing defaultable fields of the record's own version are
    /// backfilled first. Then newer versions are walked in ascending
    /// order, backfilling the fields each one adds, until a version adds
    /// a required field with no default.
    pub fn classify(
        &self,
        event_type: &str,
        schema_version: u32,
        payload: &Map<String, Value>,
    ) -> SchemaOutcome {
        let Some(versions) = self.schemas.get(event_type) else {
            return SchemaOutcome::Incompatible(format!("unknown_event_type:{}", event_type));
        };
        let Some(schema) = versions.get(&schema_version) else {
            return SchemaOutcome::Incompatible(format!(
                "unknown_schema_version:{}@{}",
                event_type, schema_version
            ));
        };

        if let Some(extra) = payload.keys().find(|k| !schema.fields.contains_key(*k)) {
            return SchemaOutcome::Incompatible(format!("unexpected_field:{}", extra));
        }

        let mut normalized = Map::new();
        let mut missing_fields = Vec::new();

        for (name, spec) in &schema.fields {
            match payload.get(name) {
                Some(Value::Null) if !spec.required => {
                    normalized.insert(name.clone(), Value::Null);
                }
                Some(value) => {
                    let Some(coerced) = spec.field_type.coerce(value) else {
                        return SchemaOutcome::Incompatible(format!(
                            "type_mismatch:{}:{}",
                            name, spec.field_type
                        ));
                    };
                    if !spec.permits(&coerced) {
                        return SchemaOutcome::Incompatible(format!("value_not_allowed:{}", name));
                    }
                    normalized.insert(name.clone(), coerced);
                }
                None if spec.is_defaultable() => {
                    normalized.insert(name.clone(), spec.backfill_value());
                    missing_fields.push(name.clone());
                }
                None => {
                    return SchemaOutcome::Incompatible(format!("missing_field:{}", name));
                }
            }
        }

        // Schema evolution: carry the record forward through newer shapes.
        let newer_versions = versions
            .range((Bound::Excluded(schema_version), Bound::Unbounded))
            .map(|(_, s)| s);
        for newer in newer_versions {
            let added: Vec<(&String, &FieldSpec)> = newer
                .fields
                .iter()
                .filter(|(name, _)| !normalized.contains_key(*name))
                .collect();
            if added.iter().any(|(_, spec)| !spec.is_defaultable()) {
                break;
            }
            for (name, spec) in added {
                normalized.insert(name.clone(), spec.backfill_value());
                missing_fields.push(name.clone());
            }
        }

        if missing_fields.is_empty() {
            SchemaOutcome::Compatible(normalized)
        } else {
            SchemaOutcome::CompatibleWithDefaults {
                payload: normalized,
                missing_fields,
            }
        }
    }
}
