//! In-memory remote source.

use std::collections::{HashMap, HashSet};

use super::{RemoteRun, RemoteSource};
use crate::error::{Error, Result};
use crate::model::JsonObject;

/// Serves a fixed set of runs and histories from memory.
///
/// Records which runs had their history requested, and can be told to fail
/// specific history fetches to simulate remote errors.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    runs: Vec<RemoteRun>,
    histories: HashMap<String, Vec<JsonObject>>,
    failing: HashSet<String>,
    history_requests: Vec<String>,
    list_requests: usize,
}

impl StaticSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a run and its history.
    #[must_use]
    pub fn with_run(mut self, run: RemoteRun, history: Vec<JsonObject>) -> Self {
        self.put_run(run, history);
        self
    }

    /// Add a run, replacing any run with the same id in place.
    pub fn put_run(&mut self, run: RemoteRun, history: Vec<JsonObject>) {
        self.histories.insert(run.id.clone(), history);
        match self.runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run,
            None => self.runs.push(run),
        }
    }

    /// Change the reported state of a run.
    pub fn set_state(&mut self, run_id: &str, state: &str) {
        if let Some(run) = self.runs.iter_mut().find(|r| r.id == run_id) {
            run.state = state.to_string();
        }
    }

    /// Make history fetches for `run_id` fail with a remote error.
    pub fn fail_history_for(&mut self, run_id: &str) {
        self.failing.insert(run_id.to_string());
    }

    /// Run ids whose history was requested, in request order.
    #[must_use]
    pub fn history_requests(&self) -> &[String] {
        &self.history_requests
    }

    /// Number of `list_runs` calls served.
    #[must_use]
    pub fn list_requests(&self) -> usize {
        self.list_requests
    }
}

impl RemoteSource for StaticSource {
    fn list_runs(
        &mut self,
        entity: &str,
        project: &str,
        _page_size: usize,
    ) -> Result<Vec<RemoteRun>> {
        self.list_requests += 1;
        Ok(self
            .runs
            .iter()
            .filter(|r| r.entity == entity && r.project == project)
            .cloned()
            .collect())
    }

    fn scan_history(&mut self, run: &RemoteRun) -> Result<Vec<JsonObject>> {
        self.history_requests.push(run.id.clone());
        if self.failing.contains(&run.id) {
            return Err(Error::Remote(format!("history fetch failed for {}", run.id)));
        }
        Ok(self.histories.get(&run.id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_runs_scoped_to_project() {
        let mut source = StaticSource::new()
            .with_run(RemoteRun::new("a", "a", "finished", "e", "p"), vec![])
            .with_run(RemoteRun::new("b", "b", "finished", "e", "other"), vec![]);

        let runs = source.list_runs("e", "p", 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "a");
        assert_eq!(source.list_requests(), 1);
    }

    #[test]
    fn test_put_run_replaces_in_place() {
        let mut source = StaticSource::new()
            .with_run(RemoteRun::new("a", "old", "running", "e", "p"), vec![]);
        source.put_run(RemoteRun::new("a", "new", "finished", "e", "p"), vec![]);

        let runs = source.list_runs("e", "p", 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].name, "new");
    }

    #[test]
    fn test_failing_history() {
        let run = RemoteRun::new("a", "a", "running", "e", "p");
        let mut source = StaticSource::new().with_run(run.clone(), vec![]);
        source.fail_history_for("a");

        assert!(matches!(source.scan_history(&run), Err(Error::Remote(_))));
        assert_eq!(source.history_requests(), ["a".to_string()]);
    }
}
