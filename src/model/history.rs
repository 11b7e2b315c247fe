//! History entry model.
//!
//! A history entry is one periodic metric snapshot logged during a run.
//! Remote entries are free-form JSON objects; a fixed allow-list of reserved
//! keys is lifted into typed columns and everything else is a metric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JsonObject;

pub const STEP_KEY: &str = "_step";
pub const TIMESTAMP_KEY: &str = "_timestamp";
pub const RUNTIME_KEY: &str = "_runtime";
pub const METADATA_KEY: &str = "_wandb";

/// Keys that are never treated as metrics. Matched by exact name only.
pub const RESERVED_KEYS: [&str; 4] = [STEP_KEY, TIMESTAMP_KEY, RUNTIME_KEY, METADATA_KEY];

/// One history snapshot for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Surrogate key assigned by the store; `None` until persisted.
    pub id: Option<i64>,
    pub run_id: String,
    pub step: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub runtime: Option<f64>,
    /// Reserved-key payloads that have no typed column.
    #[serde(default)]
    pub metadata: JsonObject,
    #[serde(default)]
    pub metrics: JsonObject,
}

impl HistoryEntry {
    /// Split a raw remote history row into reserved columns and metrics.
    ///
    /// A reserved key carrying a value of the wrong type keeps its raw value
    /// in `metadata` under its own key; its typed column stays empty.
    #[must_use]
    pub fn from_raw(run_id: &str, raw: JsonObject) -> Self {
        let mut entry = Self {
            id: None,
            run_id: run_id.to_string(),
            step: None,
            timestamp: None,
            runtime: None,
            metadata: JsonObject::new(),
            metrics: JsonObject::new(),
        };

        for (key, value) in raw {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                entry.metrics.insert(key, value);
                continue;
            }
            if value.is_null() {
                continue;
            }

            let extracted = match key.as_str() {
                STEP_KEY => as_integer(&value).map(|step| entry.step = Some(step)),
                TIMESTAMP_KEY => value
                    .as_f64()
                    .and_then(epoch_seconds_to_datetime)
                    .map(|ts| entry.timestamp = Some(ts)),
                RUNTIME_KEY => value.as_f64().map(|rt| entry.runtime = Some(rt)),
                _ => None,
            };

            if extracted.is_none() {
                entry.metadata.insert(key, value);
            }
        }

        entry
    }
}

/// A history entry joined with its run's name and project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    #[serde(flatten)]
    pub entry: HistoryEntry,
    pub run_name: String,
    pub project: String,
}

#[allow(clippy::cast_possible_truncation)]
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_seconds_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}
