//! Weights & Biases GraphQL client.
//!
//! Lists runs through the paginated `project.runs` connection and reads
//! history in step windows via `run.history(minStep, maxStep)`. Requests use
//! basic auth with the `api` user and the account API key.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{RemoteRun, RemoteSource};
use crate::error::{Error, Result};
use crate::model::JsonObject;

/// Public W&B API host.
pub const DEFAULT_BASE_URL: &str = "https://api.wandb.ai";

/// Steps requested per history window.
const HISTORY_PAGE_SIZE: usize = 1000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const RUNS_QUERY: &str = r#"
query ProjectRuns($project: String!, $entity: String!, $cursor: String, $perPage: Int!) {
  project(name: $project, entityName: $entity) {
    runs(after: $cursor, first: $perPage, order: "+created_at") {
      edges {
        node {
          id
          name
          displayName
          state
          createdAt
          heartbeatAt
          config
          summaryMetrics
          systemMetrics
          group
          jobType
          commit
          tags
          notes
          description
          sweepName
          historyLineCount
          historyKeys
          user { name username }
        }
      }
      pageInfo { endCursor hasNextPage }
    }
  }
}"#;

const HISTORY_QUERY: &str = r"
query RunHistory($project: String!, $entity: String!, $run: String!, $minStep: Int64!, $maxStep: Int64!, $samples: Int!) {
  project(name: $project, entityName: $entity) {
    run(name: $run) {
      history(minStep: $minStep, maxStep: $maxStep, samples: $samples)
    }
  }
}";

/// Node fields copied into the `metadata` component when present.
const METADATA_FIELDS: [&str; 9] = [
    "group",
    "jobType",
    "commit",
    "tags",
    "notes",
    "description",
    "user",
    "heartbeatAt",
    "historyLineCount",
];

/// Node fields requested by [`RUNS_QUERY`].
const KNOWN_FIELDS: [&str; 19] = [
    "id",
    "name",
    "displayName",
    "state",
    "createdAt",
    "heartbeatAt",
    "config",
    "summaryMetrics",
    "systemMetrics",
    "group",
    "jobType",
    "commit",
    "tags",
    "notes",
    "description",
    "sweepName",
    "historyLineCount",
    "historyKeys",
    "user",
];

/// Fields decoded into their own components and left out of `attrs`.
const COMPONENT_FIELDS: [&str; 3] = ["config", "summaryMetrics", "systemMetrics"];

/// W&B GraphQL API client.
///
/// Owns a current-thread tokio runtime so the sync engine can stay
/// synchronous.
pub struct WandbClient {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    endpoint: String,
    api_key: String,
}

impl WandbClient {
    /// Create a client for `base_url` (e.g. [`DEFAULT_BASE_URL`]).
    ///
    /// # Errors
    ///
    /// Returns `Error::Unauthorized` for an empty key, or an error if the
    /// HTTP client or runtime cannot be built.
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Unauthorized("the API key is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("dr-wandb/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            runtime,
            endpoint: format!("{}/graphql", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    async fn post<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.api_key))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: GraphqlResponse<T> = response.json().await?;
        if let Some(error) = body.errors.first() {
            return Err(Error::Remote(format!("W&B GraphQL error: {}", error.message)));
        }
        body.data
            .ok_or_else(|| Error::Remote("W&B response carried no data".to_string()))
    }

    async fn list_runs_async(
        &self,
        entity: &str,
        project: &str,
        page_size: usize,
    ) -> Result<Vec<RemoteRun>> {
        let mut runs = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let data: RunsData = self
                .post(
                    RUNS_QUERY,
                    json!({
                        "entity": entity,
                        "project": project,
                        "cursor": cursor,
                        "perPage": page_size,
                    }),
                )
                .await?;

            let connection = data
                .project
                .ok_or_else(|| Error::Remote(format!("project {entity}/{project} not found")))?
                .runs;

            for edge in connection.edges {
                runs.push(node_to_remote_run(entity, project, edge.node)?);
            }
            debug!(entity, project, fetched = runs.len(), "runs page");

            match connection.page_info.end_cursor {
                Some(next) if connection.page_info.has_next_page => cursor = Some(next),
                _ => break,
            }
        }

        Ok(runs)
    }

    async fn scan_history_async(&self, run: &RemoteRun) -> Result<Vec<JsonObject>> {
        let last_step = run
            .attrs
            .get("historyKeys")
            .and_then(|keys| keys.get("lastStep"))
            .and_then(Value::as_i64);

        let mut rows = Vec::new();
        for (min_step, max_step) in history_windows(last_step, HISTORY_PAGE_SIZE) {
            let data: HistoryData = self
                .post(
                    HISTORY_QUERY,
                    json!({
                        "entity": run.entity,
                        "project": run.project,
                        "run": run.id,
                        "minStep": min_step,
                        "maxStep": max_step,
                        "samples": HISTORY_PAGE_SIZE,
                    }),
                )
                .await?;

            let lines = data
                .project
                .and_then(|p| p.run)
                .map(|r| r.history)
                .unwrap_or_default();
            for line in lines {
                if let Some(row) = decode_history_line(line)? {
                    rows.push(row);
                }
            }
        }

        debug!(run_id = %run.id, rows = rows.len(), "history scanned");
        Ok(rows)
    }
}

impl RemoteSource for WandbClient {
    fn list_runs(
        &mut self,
        entity: &str,
        project: &str,
        page_size: usize,
    ) -> Result<Vec<RemoteRun>> {
        self.runtime
            .block_on(self.list_runs_async(entity, project, page_size))
    }

    fn scan_history(&mut self, run: &RemoteRun) -> Result<Vec<JsonObject>> {
        self.runtime.block_on(self.scan_history_async(run))
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RunsData {
    project: Option<ProjectRuns>,
}

#[derive(Debug, Deserialize)]
struct ProjectRuns {
    runs: RunConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunConnection {
    edges: Vec<RunEdge>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct RunEdge {
    node: JsonObject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    project: Option<HistoryProject>,
}

#[derive(Debug, Deserialize)]
struct HistoryProject {
    run: Option<HistoryRun>,
}

#[derive(Debug, Deserialize)]
struct HistoryRun {
    #[serde(default)]
    history: Vec<Value>,
}

/// Half-open `[min, max)` step windows covering `0..=last_step`.
///
/// A run without a known last step has no history.
#[must_use]
pub fn history_windows(last_step: Option<i64>, page_size: usize) -> Vec<(i64, i64)> {
    let Some(last) = last_step.filter(|s| *s >= 0) else {
        return Vec::new();
    };
    let size = i64::try_from(page_size.max(1)).unwrap_or(i64::MAX);

    let mut windows = Vec::new();
    let mut start = 0_i64;
    while start <= last {
        let end = start.saturating_add(size);
        windows.push((start, end));
        start = end;
    }
    windows
}

/// Parse a W&B `createdAt` value.
///
/// The API returns naive UTC timestamps (`2024-03-01T12:00:00`), sometimes
/// with an offset.
#[must_use]
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn node_to_remote_run(entity: &str, project: &str, node: JsonObject) -> Result<RemoteRun> {
    let id = node
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Remote("run node without a name".to_string()))?
        .to_string();
    let name = node
        .get("displayName")
        .and_then(Value::as_str)
        .unwrap_or(&id)
        .to_string();

    let mut run = RemoteRun::new(
        &id,
        &name,
        node.get("state").and_then(Value::as_str).unwrap_or_default(),
        entity,
        project,
    );
    run.created_at = node
        .get("createdAt")
        .and_then(Value::as_str)
        .and_then(parse_created_at);
    run.config = unwrap_config(decode_json_field(node.get("config"))?);
    run.summary = decode_json_field(node.get("summaryMetrics"))?;
    run.system_metrics = decode_json_field(node.get("systemMetrics"))?;
    run.metadata = METADATA_FIELDS
        .iter()
        .filter_map(|key| match node.get(*key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(((*key).to_string(), value.clone())),
        })
        .collect();

    for (key, value) in node {
        if COMPONENT_FIELDS.contains(&key.as_str()) {
            continue;
        }
        let value = if key == "historyKeys" {
            Value::Object(decode_json_field(Some(&value))?)
        } else {
            value
        };
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            run.extra.insert(key.clone(), value.clone());
        }
        run.attrs.insert(key, value);
    }

    Ok(run)
}

/// Decode a field that W&B serves either as a JSON-encoded string or inline.
fn decode_json_field(value: Option<&Value>) -> Result<JsonObject> {
    match value {
        Some(Value::String(text)) if !text.trim().is_empty() => {
            match parse_lenient(text)? {
                Value::Object(map) => Ok(map),
                _ => Ok(JsonObject::new()),
            }
        }
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Ok(JsonObject::new()),
    }
}

/// Config entries arrive as `{"value": v, "desc": d}`; keep `v`.
fn unwrap_config(config: JsonObject) -> JsonObject {
    config
        .into_iter()
        .map(|(key, value)| match value {
            Value::Object(mut entry) if entry.contains_key("value") => {
                let inner = entry.remove("value").unwrap_or(Value::Null);
                (key, inner)
            }
            other => (key, other),
        })
        .collect()
}

fn decode_history_line(line: Value) -> Result<Option<JsonObject>> {
    match line {
        Value::String(text) => match parse_lenient(&text)? {
            Value::Object(map) => Ok(Some(map)),
            _ => Ok(None),
        },
        Value::Object(map) => Ok(Some(map)),
        _ => Ok(None),
    }
}

/// Parse JSON text that may carry bare `NaN`, `Infinity` or `-Infinity`.
///
/// W&B serializes non-finite floats that way; they become `null`.
fn parse_lenient(text: &str) -> serde_json::Result<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(err) => match replace_non_finite(text) {
            Some(rewritten) => serde_json::from_str(&rewritten),
            None => Err(err),
        },
    }
}

/// Rewrite non-finite number tokens outside string literals to `null`.
///
/// Returns `None` if there was nothing to rewrite.
fn replace_non_finite(text: &str) -> Option<String> {
    const TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut replaced = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push_str("null");
            rest = &rest[token.len()..];
            replaced = true;
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    replaced.then_some(out)
}

/// Map a non-success HTTP status to an error.
fn status_error(status: StatusCode, body: &str) -> Error {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Error::Unauthorized(format!("W&B rejected the API key ({status})"));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Error::Remote("W&B API rate limit exceeded (429)".to_string());
    }
    Error::Remote(format!(
        "W&B API error ({status}): {}",
        body.chars().take(500).collect::<String>()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn object(value: Value) -> JsonObject {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_history_windows() {
        assert!(history_windows(None, 1000).is_empty());
        assert!(history_windows(Some(-1), 1000).is_empty());
        assert_eq!(history_windows(Some(0), 1000), vec![(0, 1000)]);
        assert_eq!(history_windows(Some(999), 1000), vec![(0, 1000)]);
        assert_eq!(history_windows(Some(1000), 1000), vec![(0, 1000), (1000, 2000)]);
    }

    #[test]
    fn test_parse_created_at_formats() {
        let naive = parse_created_at("2024-03-01T12:30:45").unwrap();
        assert_eq!((naive.year(), naive.month(), naive.hour()), (2024, 3, 12));

        let offset = parse_created_at("2024-03-01T12:30:45+02:00").unwrap();
        assert_eq!(offset.hour(), 10);

        assert!(parse_created_at("yesterday").is_none());
    }

    #[test]
    fn test_unwrap_config() {
        let config = unwrap_config(object(json!({
            "lr": {"value": 0.001, "desc": null},
            "layers": {"value": [64, 64]},
            "plain": 3
        })));
        assert_eq!(config["lr"], json!(0.001));
        assert_eq!(config["layers"], json!([64, 64]));
        assert_eq!(config["plain"], json!(3));
    }

    #[test]
    fn test_node_to_remote_run() {
        let node = object(json!({
            "id": "UnVuOnYx",
            "name": "abc123",
            "displayName": "bright-sun-1",
            "state": "running",
            "createdAt": "2024-03-01T12:00:00",
            "config": "{\"lr\": {\"value\": 0.01}}",
            "summaryMetrics": "{\"loss\": 0.5}",
            "systemMetrics": "{}",
            "group": "ablation",
            "tags": ["a"],
            "sweepName": null,
            "historyKeys": "{\"lastStep\": 42}",
            "futureField": 1
        }));

        let run = node_to_remote_run("team", "proj", node).unwrap();
        assert_eq!(run.id, "abc123");
        assert_eq!(run.name, "bright-sun-1");
        assert_eq!(run.state, "running");
        assert!(run.created_at.is_some());
        assert_eq!(run.config["lr"], json!(0.01));
        assert_eq!(run.summary["loss"], json!(0.5));
        assert_eq!(run.metadata["group"], json!("ablation"));
        assert!(!run.metadata.contains_key("notes"));
        assert_eq!(run.attrs["historyKeys"]["lastStep"], json!(42));
        assert!(!run.attrs.contains_key("config"));
        assert_eq!(run.extra, object(json!({"futureField": 1})));
    }

    #[test]
    fn test_node_without_name_is_rejected() {
        let node = object(json!({"displayName": "x"}));
        assert!(matches!(
            node_to_remote_run("e", "p", node),
            Err(Error::Remote(_))
        ));
    }

    #[test]
    fn test_decode_history_line() {
        let row = decode_history_line(json!("{\"_step\": 1, \"loss\": 0.1}"))
            .unwrap()
            .unwrap();
        assert_eq!(row["_step"], json!(1));
        assert!(decode_history_line(json!(5)).unwrap().is_none());
    }

    #[test]
    fn test_decode_history_line_with_non_finite_values() {
        let row = decode_history_line(json!(
            "{\"_step\": 3, \"loss\": NaN, \"grad\": -Infinity, \"lr\": Infinity, \"note\": \"NaN \\\" Infinity\"}"
        ))
        .unwrap()
        .unwrap();
        assert_eq!(row["_step"], json!(3));
        assert_eq!(row["loss"], Value::Null);
        assert_eq!(row["grad"], Value::Null);
        assert_eq!(row["lr"], Value::Null);
        assert_eq!(row["note"], json!("NaN \" Infinity"));
    }

    #[test]
    fn test_decode_summary_with_nan() {
        let summary = decode_json_field(Some(&json!("{\"best\": NaN, \"acc\": 0.5}"))).unwrap();
        assert_eq!(summary["best"], Value::Null);
        assert_eq!(summary["acc"], json!(0.5));
    }

    #[test]
    fn test_malformed_json_still_fails() {
        assert!(decode_history_line(json!("{\"loss\": }")).is_err());
        assert!(replace_non_finite("{\"a\": 1}").is_none());
    }

    #[test]
    fn test_empty_api_key_rejected() {
        assert!(matches!(
            WandbClient::new(DEFAULT_BASE_URL, "  ".to_string()),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_status_error_mapping() {
        let rejected = status_error(StatusCode::UNAUTHORIZED, "");
        assert!(matches!(rejected, Error::Unauthorized(_)));
        assert!(rejected.hint().unwrap().contains("wandb login"));
        assert!(matches!(status_error(StatusCode::FORBIDDEN, ""), Error::Unauthorized(_)));

        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            Error::Remote(_)
        ));

        let long_body = "x".repeat(2_000);
        match status_error(StatusCode::BAD_GATEWAY, &long_body) {
            Error::Remote(message) => assert!(message.len() < 600),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
