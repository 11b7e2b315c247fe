//! Filtered query construction over `runs` and `history`.
//!
//! Filters are a closed set of keys (`project`, `entity`, `state`,
//! `run_ids`) combined conjunctively. Anything else is rejected while the
//! filter is being built, before any SQL runs.

use std::collections::BTreeSet;

use rusqlite::types::Value as SqlValue;

use crate::error::{Error, Result};
use crate::model::{ComponentSelection, RunState};

/// Filter keys accepted by [`RunFilter::from_pairs`].
pub const SUPPORTED_FILTER_KEYS: [&str; 4] = ["project", "entity", "state", "run_ids"];

/// Standard (non-JSON) `runs` columns, in select order.
pub const RUN_STANDARD_COLUMNS: [&str; 6] =
    ["run_id", "run_name", "state", "project", "entity", "created_at"];

/// Conjunctive filter over runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub project: Option<String>,
    pub entity: Option<String>,
    pub state: Option<RunState>,
    /// Set membership on `run_id`. An empty set matches nothing.
    pub run_ids: Option<BTreeSet<String>>,
}

impl RunFilter {
    /// A filter that matches every run.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Runs of one entity/project pair.
    #[must_use]
    pub fn for_project(entity: &str, project: &str) -> Self {
        Self {
            entity: Some(entity.to_string()),
            project: Some(project.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn with_run_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Build a filter from untyped key/value pairs.
    ///
    /// `run_ids` takes a comma-separated list. Values must be non-empty and
    /// each key may appear once.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFilter` for keys outside
    /// [`SUPPORTED_FILTER_KEYS`] and `Error::InvalidFilterValue` for empty,
    /// duplicate or unparseable values.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::default();
        let mut seen = BTreeSet::new();

        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();

            if !SUPPORTED_FILTER_KEYS.contains(&key) {
                return Err(Error::InvalidFilter { key: key.to_string() });
            }
            if !seen.insert(key.to_string()) {
                return Err(invalid_value(key, "key given more than once"));
            }
            if value.is_empty() {
                return Err(invalid_value(key, "value must not be empty"));
            }

            match key {
                "project" => filter.project = Some(value.to_string()),
                "entity" => filter.entity = Some(value.to_string()),
                "state" => {
                    let state = value
                        .parse::<RunState>()
                        .map_err(|e| invalid_value(key, &e.to_string()))?;
                    filter.state = Some(state);
                }
                _ => {
                    let ids: BTreeSet<String> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(String::from)
                        .collect();
                    if ids.is_empty() {
                        return Err(invalid_value(key, "no run ids given"));
                    }
                    filter.run_ids = Some(ids);
                }
            }
        }

        Ok(filter)
    }

    /// Parse `key=value` command-line arguments into a filter.
    ///
    /// # Errors
    ///
    /// Returns an error for arguments without `=` or any error from
    /// [`RunFilter::from_pairs`].
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let pairs = args
            .iter()
            .map(|arg| {
                arg.as_ref()
                    .split_once('=')
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "filter '{}' is not of the form key=value",
                            arg.as_ref()
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_pairs(pairs)
    }

    /// Whether no restriction is applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// SQL `WHERE` clause (including the keyword) against alias `r`, with
    /// its positional parameters.
    #[must_use]
    pub fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(project) = &self.project {
            params.push(SqlValue::Text(project.clone()));
            conditions.push(format!("r.project = ?{}", params.len()));
        }
        if let Some(entity) = &self.entity {
            params.push(SqlValue::Text(entity.clone()));
            conditions.push(format!("r.entity = ?{}", params.len()));
        }
        if let Some(state) = &self.state {
            params.push(SqlValue::Text(state.as_str().to_string()));
            conditions.push(format!("r.state = ?{}", params.len()));
        }
        if let Some(ids) = &self.run_ids {
            if ids.is_empty() {
                conditions.push("1 = 0".to_string());
            } else {
                let placeholders: Vec<String> = ids
                    .iter()
                    .map(|id| {
                        params.push(SqlValue::Text(id.clone()));
                        format!("?{}", params.len())
                    })
                    .collect();
                conditions.push(format!("r.run_id IN ({})", placeholders.join(", ")));
            }
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

fn invalid_value(key: &str, reason: &str) -> Error {
    Error::InvalidFilterValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Base table of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Runs,
    /// History rows joined to their run for `run_name` and `project`.
    History,
}

/// SQL text plus positional parameters.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Build a filtered select.
///
/// For [`QueryKind::Runs`] only the selected component columns are read;
/// `selection` is ignored for history.
#[must_use]
pub fn build_query(
    kind: QueryKind,
    filter: &RunFilter,
    selection: &ComponentSelection,
) -> BuiltQuery {
    let (where_sql, params) = filter.where_clause();

    let sql = match kind {
        QueryKind::Runs => {
            let mut columns: Vec<String> = RUN_STANDARD_COLUMNS
                .iter()
                .map(|c| format!("r.{c} AS {c}"))
                .collect();
            columns.extend(
                selection
                    .components()
                    .iter()
                    .map(|c| format!("r.{0} AS {0}", c.as_str())),
            );
            if selection.includes_extra() {
                columns.push("r.extra AS extra".to_string());
            }
            format!(
                "SELECT {} FROM runs r{where_sql} ORDER BY r.run_id",
                columns.join(", ")
            )
        }
        QueryKind::History => format!(
            "SELECT h.id, h.run_id, h.step, h.timestamp, h.runtime, h.metadata, h.metrics,
                    r.run_name, r.project
             FROM history h JOIN runs r ON h.run_id = r.run_id{where_sql}
             ORDER BY h.run_id, h.step, h.id"
        ),
    };

    BuiltQuery { sql, params }
}
