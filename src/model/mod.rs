//! Data models for dr-wandb.
//!
//! - [`Run`] and [`RunState`]
//! - [`HistoryEntry`] and the reserved-key allow-list
//! - [`RunComponent`] and [`ComponentSelection`] projections

pub mod component;
pub mod history;
pub mod run;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

pub use component::{ComponentSelection, RunComponent};
pub use history::{HistoryEntry, HistoryRow, RESERVED_KEYS};
pub use run::{Run, RunState};

/// Arbitrary remote-reported JSON object.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// History timestamps are stored as INTEGER unix microseconds.
#[must_use]
pub fn to_unix_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Run creation times are stored as INTEGER unix nanoseconds.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` for instants outside the `i64`
/// nanosecond range (1677-09-21 to 2262-04-11).
pub fn to_unix_nanos(ts: &DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt().ok_or_else(|| {
        Error::InvalidArgument(format!("timestamp {ts} is outside the storable range"))
    })
}

#[must_use]
pub fn from_unix_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

#[must_use]
pub fn from_unix_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}
