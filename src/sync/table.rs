//! Arrow table construction from JSON-valued rows.
//!
//! Flattened JSON columns get the narrowest type that holds every non-null
//! value: Int64, Float64, Boolean, Utf8, or Utf8 carrying JSON text.

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use serde_json::Value;

use crate::error::Result;
use crate::model::JsonObject;

/// Timezone attached to exported timestamp columns.
pub const TIMESTAMP_TZ: &str = "UTC";

/// Inferred Arrow type of a flattened JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int64,
    Float64,
    Boolean,
    Utf8,
    /// Mixed or nested values, stored as JSON text.
    Json,
}

impl ColumnType {
    /// Infer the column type from its values; nulls and missing values are ignored.
    #[must_use]
    pub fn infer<'v, I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<&'v Value>>,
    {
        let mut ints = true;
        let mut numbers = true;
        let mut bools = true;
        let mut strings = true;
        let mut seen = false;

        for value in values.into_iter().flatten() {
            if value.is_null() {
                continue;
            }
            seen = true;
            ints &= value.is_i64();
            numbers &= value.is_number() && value.as_f64().is_some();
            bools &= value.is_boolean();
            strings &= value.is_string();
        }

        match (seen, ints, numbers, bools, strings) {
            (false, ..) => Self::Utf8,
            (true, true, ..) => Self::Int64,
            (true, false, true, ..) => Self::Float64,
            (true, _, _, true, _) => Self::Boolean,
            (true, _, _, _, true) => Self::Utf8,
            _ => Self::Json,
        }
    }
}

/// Builds a [`RecordBatch`] column by column.
#[derive(Debug, Default)]
pub struct TableBuilder {
    fields: Vec<Field>,
    columns: Vec<ArrayRef>,
}

impl TableBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Column names added so far.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name().as_str())
    }

    fn push(&mut self, name: &str, data_type: DataType, column: ArrayRef) {
        self.fields.push(Field::new(name, data_type, true));
        self.columns.push(column);
    }

    pub fn push_utf8<S: AsRef<str>>(&mut self, name: &str, values: &[Option<S>]) {
        let array: StringArray = values
            .iter()
            .map(|v| v.as_ref().map(AsRef::<str>::as_ref))
            .collect();
        self.push(name, DataType::Utf8, Arc::new(array));
    }

    pub fn push_i64(&mut self, name: &str, values: Vec<Option<i64>>) {
        self.push(name, DataType::Int64, Arc::new(Int64Array::from(values)));
    }

    pub fn push_f64(&mut self, name: &str, values: Vec<Option<f64>>) {
        self.push(name, DataType::Float64, Arc::new(Float64Array::from(values)));
    }

    /// Unix-microsecond timestamps in UTC.
    pub fn push_timestamp(&mut self, name: &str, values: Vec<Option<i64>>) {
        let array = TimestampMicrosecondArray::from(values).with_timezone(TIMESTAMP_TZ);
        self.push(
            name,
            DataType::Timestamp(TimeUnit::Microsecond, Some(TIMESTAMP_TZ.into())),
            Arc::new(array),
        );
    }

    /// Whole JSON objects as text; empty objects become null.
    pub fn push_json_text(&mut self, name: &str, values: &[&JsonObject]) {
        let text: Vec<Option<String>> = values
            .iter()
            .map(|obj| (!obj.is_empty()).then(|| Value::Object((*obj).clone()).to_string()))
            .collect();
        self.push_utf8(name, &text);
    }

    /// One typed column holding `key` of every row object.
    pub fn push_inferred(&mut self, name: &str, rows: &[&JsonObject], key: &str) {
        let values: Vec<Option<&Value>> = rows
            .iter()
            .map(|row| row.get(key).filter(|v| !v.is_null()))
            .collect();

        match ColumnType::infer(values.iter().copied()) {
            ColumnType::Int64 => {
                let column = values.iter().copied().map(|v| v.and_then(Value::as_i64));
                self.push_i64(name, column.collect());
            }
            ColumnType::Float64 => {
                let column = values.iter().copied().map(|v| v.and_then(Value::as_f64));
                self.push_f64(name, column.collect());
            }
            ColumnType::Boolean => {
                let array: BooleanArray =
                    values.iter().copied().map(|v| v.and_then(Value::as_bool)).collect();
                self.push(name, DataType::Boolean, Arc::new(array));
            }
            ColumnType::Utf8 => {
                let text: Vec<Option<&str>> =
                    values.iter().copied().map(|v| v.and_then(Value::as_str)).collect();
                self.push_utf8(name, &text);
            }
            ColumnType::Json => {
                let text: Vec<Option<String>> =
                    values.iter().copied().map(|v| v.map(Value::to_string)).collect();
                self.push_utf8(name, &text);
            }
        }
    }

    /// Flatten the top-level keys of `rows` into typed columns, sorted by key.
    ///
    /// Keys clashing with a column already present are prefixed with
    /// `<prefix>.`, repeatedly until the name is unused.
    pub fn push_flattened(&mut self, prefix: &str, rows: &[&JsonObject]) {
        let keys: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect();
        let existing: BTreeSet<String> = self.names().map(String::from).collect();
        let mut taken: BTreeSet<String> = existing
            .iter()
            .cloned()
            .chain(keys.iter().map(|key| (*key).to_string()))
            .collect();

        for key in keys {
            let name = if existing.contains(key) {
                let mut name = format!("{prefix}.{key}");
                while taken.contains(&name) {
                    name = format!("{prefix}.{name}");
                }
                taken.insert(name.clone());
                name
            } else {
                key.to_string()
            };
            self.push_inferred(&name, rows, key);
        }
    }

    /// # Errors
    ///
    /// Returns an Arrow error if column lengths disagree.
    pub fn finish(self) -> Result<RecordBatch> {
        let schema = Arc::new(Schema::new(self.fields));
        Ok(RecordBatch::try_new(schema, self.columns)?)
    }
}
