//! Remote experiment-tracking source.
//!
//! The sync engine only sees the [`RemoteSource`] trait:
//! - [`WandbClient`] talks to the Weights & Biases GraphQL API
//! - [`StaticSource`] serves runs from memory (tests, offline replay)

mod static_source;
mod wandb;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::{JsonObject, Run, RunState};

pub use static_source::StaticSource;
pub use wandb::{history_windows, parse_created_at, WandbClient, DEFAULT_BASE_URL};

/// Source of run listings and history streams.
pub trait RemoteSource {
    /// List every run of `entity/project`, fetching `page_size` runs per request.
    ///
    /// # Errors
    ///
    /// Returns remote errors (auth, rate limiting, network) unmodified.
    fn list_runs(&mut self, entity: &str, project: &str, page_size: usize)
        -> Result<Vec<RemoteRun>>;

    /// Full history of one run as free-form rows.
    ///
    /// # Errors
    ///
    /// Returns remote errors unmodified.
    fn scan_history(&mut self, run: &RemoteRun) -> Result<Vec<JsonObject>>;
}

/// A run as reported by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRun {
    pub id: String,
    pub name: String,
    /// Raw remote state; parsed when converted with [`RemoteRun::to_run`].
    pub state: String,
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
    /// Raw attribute object as returned by the remote.
    #[serde(default)]
    pub attrs: JsonObject,
    /// Remote fields outside the known component set.
    #[serde(default)]
    pub extra: JsonObject,
}

impl RemoteRun {
    /// Minimal remote run with empty components.
    #[must_use]
    pub fn new(id: &str, name: &str, state: &str, entity: &str, project: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            state: state.to_string(),
            project: project.to_string(),
            entity: entity.to_string(),
            created_at: None,
            config: JsonObject::new(),
            summary: JsonObject::new(),
            metadata: JsonObject::new(),
            system_metrics: JsonObject::new(),
            attrs: JsonObject::new(),
            extra: JsonObject::new(),
        }
    }

    /// Convert to the stored representation.
    ///
    /// `attrs` becomes `system_attrs`; sweep fields of `attrs` become
    /// `sweep_info`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if the remote state is not a known run state.
    pub fn to_run(&self) -> Result<Run> {
        let state: RunState = self.state.parse()?;
        let mut run = Run::new(&self.id, &self.name, state, &self.entity, &self.project);
        run.created_at = self.created_at;
        run.config = self.config.clone();
        run.summary = self.summary.clone();
        run.metadata = self.metadata.clone();
        run.system_metrics = self.system_metrics.clone();
        run.system_attrs = self.attrs.clone();
        run.sweep_info = sweep_info(&self.attrs);
        run.extra = self.extra.clone();
        Ok(run)
    }
}

fn sweep_info(attrs: &JsonObject) -> JsonObject {
    ["sweepName", "sweep"]
        .into_iter()
        .filter_map(|key| match attrs.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some((key.to_string(), value.clone())),
        })
        .collect()
}
