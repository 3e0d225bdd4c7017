//! Analytical queries over a checkpoint snapshot.
//!
//! Read-only helpers for the reports downstream consumers build from a
//! checkpoint: filtering by event type, payload field and time window,
//! grouped counts, and day lags between a payload date and the event time.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::domain::Snapshot;
use crate::events::{EventRecord, Timestamp};

/// Conjunctive filter over snapshot records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    event_type: Option<String>,
    field_equals: Vec<(String, Value)>,
    from: Option<Timestamp>,
    until: Option<Timestamp>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Payload field must equal `value`.
    pub fn field_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field_equals.push((field.into(), value.into()));
        self
    }

    /// `occurred_at` in `[from, until)`. Either bound may be open.
    pub fn between(mut self, from: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        self.from = from;
        self.until = until;
        self
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        if let Some(ty) = &self.event_type {
            if record.event_type != *ty {
                return false;
            }
        }
        if self.from.is_some_and(|from| record.occurred_at < from) {
            return false;
        }
        if self.until.is_some_and(|until| record.occurred_at >= until) {
            return false;
        }
        self.field_equals
            .iter()
            .all(|(field, value)| record.payload.get(field) == Some(value))
    }

    /// Matching records, sorted by `(occurred_at, event_id)`.
    pub fn select<'a>(&self, snapshot: &'a Snapshot) -> Vec<&'a EventRecord> {
        let mut out: Vec<&EventRecord> = snapshot
            .records
            .values()
            .filter(|r| self.matches(r))
            .collect();
        out.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        out
    }

    pub fn count(&self, snapshot: &Snapshot) -> usize {
        snapshot.records.values().filter(|r| self.matches(r)).count()
    }
}

/// Number of stored records per event type.
pub fn count_by_event_type(snapshot: &Snapshot) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for r in snapshot.records.values() {
        *counts.entry(r.event_type.clone()).or_insert(0) += 1;
    }
    counts
}

/// Number of stored records per value of a payload field.
///
/// Records without the field, or with null, are not counted.
pub fn group_counts(snapshot: &Snapshot, field: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for value in snapshot.records.values().filter_map(|r| field_key(r, field)) {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

/// Sorted distinct values of a payload field.
pub fn distinct_values(snapshot: &Snapshot, field: &str) -> Vec<String> {
    snapshot
        .records
        .values()
        .filter_map(|r| field_key(r, field))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Payload date field read by the timing helpers.
pub const VISIT_DATE_FIELD: &str = "visit_date";

/// Day lag of one record: whole days from its payload date to the UTC date
/// of `occurred_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayLag {
    pub event_id: String,
    pub field_date: NaiveDate,
    pub days: i64,
}

/// Day lags for every record matching `query`, in `select` order.
///
/// `date_field` must hold a `YYYY-MM-DD` string; records where it is
/// missing or unparsable are left out. Lags are negative when the event
/// precedes the date.
pub fn days_from_field_date(snapshot: &Snapshot, query: &RecordQuery, date_field: &str) -> Vec<DayLag> {
    query
        .select(snapshot)
        .into_iter()
        .filter_map(|r| {
            let field_date = r
                .payload
                .get(date_field)
                .and_then(Value::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())?;
            let event_date = DateTime::from_timestamp_millis(r.occurred_at.as_millis())?.date_naive();
            Some(DayLag {
                event_id: r.event_id.clone(),
                field_date,
                days: event_date.signed_duration_since(field_date).num_days(),
            })
        })
        .collect()
}

/// Days from `visit_date` to each `submit` event.
pub fn submission_timing(snapshot: &Snapshot) -> Vec<DayLag> {
    days_from_field_date(snapshot, &RecordQuery::new().field_eq("action", "submit"), VISIT_DATE_FIELD)
}

/// Days from `visit_date` to each `pass-qc` event.
pub fn qc_timing(snapshot: &Snapshot) -> Vec<DayLag> {
    days_from_field_date(snapshot, &RecordQuery::new().field_eq("action", "pass-qc"), VISIT_DATE_FIELD)
}

/// Whole days from the first `from_action` record to the first later
/// `to_action` record, per value of `key_field`.
///
/// Keys lacking either action, or whose `to_action` only precedes the
/// first `from_action`, are left out.
pub fn days_between_actions(
    snapshot: &Snapshot,
    key_field: &str,
    from_action: &str,
    to_action: &str,
) -> BTreeMap<String, i64> {
    let mut starts: BTreeMap<String, Timestamp> = BTreeMap::new();
    for r in RecordQuery::new().field_eq("action", from_action).select(snapshot) {
        if let Some(key) = field_key(r, key_field) {
            starts.entry(key).or_insert(r.occurred_at);
        }
    }
    let mut lags = BTreeMap::new();
    for r in RecordQuery::new().field_eq("action", to_action).select(snapshot) {
        let Some(key) = field_key(r, key_field) else {
            continue;
        };
        if lags.contains_key(&key) {
            continue;
        }
        if let Some(&start) = starts.get(&key) {
            if r.occurred_at >= start {
                let elapsed = r.occurred_at.as_millis() - start.as_millis();
                lags.insert(key, elapsed / 86_400_000);
            }
        }
    }
    lags
}

fn field_key(record: &EventRecord, field: &str) -> Option<String> {
    match record.payload.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
