//! Run model.
//!
//! A run is one tracked execution of an experiment. Runs are keyed by
//! `run_id` and are only ever created or fully overwritten by sync.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::component::{ComponentSelection, RunComponent};
use super::JsonObject;
use crate::error::{Error, Result};

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Finished,
    Running,
    Crashed,
    Failed,
    Killed,
}

impl RunState {
    pub const ALL: [Self; 5] = [
        Self::Finished,
        Self::Running,
        Self::Crashed,
        Self::Failed,
        Self::Killed,
    ];

    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Running => "running",
            Self::Crashed => "crashed",
            Self::Failed => "failed",
            Self::Killed => "killed",
        }
    }

    /// Finished runs are immutable on the remote side.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidState(s.to_string()))
    }
}

impl ToSql for RunState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RunState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        s.parse()
            .map_err(|e: Error| FromSqlError::Other(e.to_string().into()))
    }
}

/// A run as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub run_name: String,
    pub state: RunState,
    pub project: String,
    pub entity: String,
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub config: JsonObject,
    #[serde(default)]
    pub summary: JsonObject,
    #[serde(default)]
    pub metadata: JsonObject,
    #[serde(default)]
    pub system_metrics: JsonObject,
    #[serde(default)]
    pub system_attrs: JsonObject,
    #[serde(default)]
    pub sweep_info: JsonObject,

    /// Catch-all for remote fields that fit no named component.
    #[serde(default)]
    pub extra: JsonObject,
}

impl Run {
    /// Create a run with empty components.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        run_name: impl Into<String>,
        state: RunState,
        entity: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            run_name: run_name.into(),
            state,
            project: project.into(),
            entity: entity.into(),
            created_at: None,
            config: JsonObject::new(),
            summary: JsonObject::new(),
            metadata: JsonObject::new(),
            system_metrics: JsonObject::new(),
            system_attrs: JsonObject::new(),
            sweep_info: JsonObject::new(),
            extra: JsonObject::new(),
        }
    }

    #[must_use]
    pub fn component(&self, component: RunComponent) -> &JsonObject {
        match component {
            RunComponent::Config => &self.config,
            RunComponent::Summary => &self.summary,
            RunComponent::Metadata => &self.metadata,
            RunComponent::SystemMetrics => &self.system_metrics,
            RunComponent::SystemAttrs => &self.system_attrs,
            RunComponent::SweepInfo => &self.sweep_info,
        }
    }

    pub fn component_mut(&mut self, component: RunComponent) -> &mut JsonObject {
        match component {
            RunComponent::Config => &mut self.config,
            RunComponent::Summary => &mut self.summary,
            RunComponent::Metadata => &mut self.metadata,
            RunComponent::SystemMetrics => &mut self.system_metrics,
            RunComponent::SystemAttrs => &mut self.system_attrs,
            RunComponent::SweepInfo => &mut self.sweep_info,
        }
    }

    /// Serialize the standard columns plus the selected components.
    ///
    /// Components are nested under their own name so keys from different
    /// components never collide.
    #[must_use]
    pub fn to_json(&self, selection: &ComponentSelection) -> Value {
        let mut obj = JsonObject::new();
        obj.insert("run_id".into(), Value::String(self.run_id.clone()));
        obj.insert("run_name".into(), Value::String(self.run_name.clone()));
        obj.insert("state".into(), Value::String(self.state.as_str().into()));
        obj.insert("project".into(), Value::String(self.project.clone()));
        obj.insert("entity".into(), Value::String(self.entity.clone()));
        obj.insert(
            "created_at".into(),
            self.created_at
                .map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
        );

        for component in selection.components() {
            obj.insert(
                component.as_str().into(),
                Value::Object(self.component(component).clone()),
            );
        }
        if selection.includes_extra() {
            obj.insert("extra".into(), Value::Object(self.extra.clone()));
        }

        Value::Object(obj)
    }
}
