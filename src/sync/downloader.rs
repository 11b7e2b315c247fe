//! Incremental project download.
//!
//! A remote run is re-fetched when it is new to the store or its stored
//! state is not `finished`. Finished runs are immutable remotely, so they are
//! skipped unless a refresh is forced.

use std::collections::HashMap;

use tracing::{debug, info};

use super::types::DownloadStats;
use crate::error::Result;
use crate::model::RunState;
use crate::remote::{RemoteRun, RemoteSource};
use crate::storage::{RunFilter, RunStore, UpsertOutcome};

/// Remote runs requested per listing page.
pub const DEFAULT_RUNS_PER_PAGE: usize = 500;

/// Progress notifier: `(index, total, run_name)`, index starting at 1.
pub type ProgressCallback = Box<dyn FnMut(usize, usize, &str)>;

/// Remote runs that need downloading, in remote listing order.
///
/// Selected iff `force_refresh`, or the run is absent from `stored`, or its
/// stored state is not `finished`.
#[must_use]
pub fn select_updated_runs<'r>(
    remote: &'r [RemoteRun],
    stored: &HashMap<String, RunState>,
    force_refresh: bool,
) -> Vec<&'r RemoteRun> {
    remote
        .iter()
        .filter(|run| {
            force_refresh
                || stored
                    .get(&run.id)
                    .is_none_or(|state| !state.is_finished())
        })
        .collect()
}

/// Syncs runs and histories of one project from a [`RemoteSource`] into a
/// [`RunStore`].
pub struct Downloader<'a, S: RemoteSource> {
    store: &'a mut RunStore,
    source: S,
    runs_per_page: usize,
    progress: ProgressCallback,
}

impl<'a, S: RemoteSource> Downloader<'a, S> {
    #[must_use]
    pub fn new(store: &'a mut RunStore, source: S) -> Self {
        Self {
            store,
            source,
            runs_per_page: DEFAULT_RUNS_PER_PAGE,
            progress: Box::new(|index, total, name| {
                info!(index, total, run = name, "run downloaded");
            }),
        }
    }

    /// Remote page size for run listings.
    #[must_use]
    pub fn with_runs_per_page(mut self, runs_per_page: usize) -> Self {
        self.runs_per_page = runs_per_page.max(1);
        self
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(usize, usize, &str) + 'static,
    {
        self.progress = Box::new(callback);
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub fn runs_per_page(&self) -> usize {
        self.runs_per_page
    }

    /// Download new and unfinished runs of `entity/project`.
    ///
    /// Each run is committed on its own, followed by its history unless
    /// `runs_only`. `force_refresh` re-downloads every remote run.
    ///
    /// # Errors
    ///
    /// The first remote or storage error aborts the remaining runs; runs
    /// already written stay committed.
    pub fn download_project(
        &mut self,
        entity: &str,
        project: &str,
        runs_only: bool,
        force_refresh: bool,
    ) -> Result<DownloadStats> {
        let stored = self
            .store
            .get_existing_run_states(&RunFilter::for_project(entity, project))?;
        let remote = self.source.list_runs(entity, project, self.runs_per_page)?;
        let selected = select_updated_runs(&remote, &stored, force_refresh);

        info!(
            entity,
            project,
            remote = remote.len(),
            stored = stored.len(),
            selected = selected.len(),
            "download started"
        );

        let mut stats = DownloadStats {
            num_wandb_runs: remote.len(),
            num_stored_runs: stored.len(),
            ..DownloadStats::default()
        };

        let total = selected.len();
        for (index, remote_run) in selected.into_iter().enumerate() {
            let run = remote_run.to_run()?;
            match self.store.store_run(&run)? {
                UpsertOutcome::Inserted => stats.num_new_runs += 1,
                UpsertOutcome::Updated => stats.num_updated_runs += 1,
            }
            stats.downloaded_run_ids.push(run.run_id.clone());

            if !runs_only {
                let entries = self.source.scan_history(remote_run)?;
                let written = self.store.store_history(&run.run_id, entries)?;
                debug!(run_id = %run.run_id, entries = written, "history stored");
                stats.num_downloaded_histories += 1;
                stats.num_downloaded_history_entries += written;
            }

            (self.progress)(index + 1, total, &run.run_name);
        }

        info!(
            new = stats.num_new_runs,
            updated = stats.num_updated_runs,
            history_entries = stats.num_downloaded_history_entries,
            "download finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::{json, Value};

    use super::*;
    use crate::error::Error;
    use crate::model::{ComponentSelection, JsonObject};
    use crate::remote::StaticSource;

    fn row(value: Value) -> JsonObject {
        value.as_object().unwrap().clone()
    }

    fn history(steps: i64) -> Vec<JsonObject> {
        (0..steps)
            .map(|s| row(json!({"_step": s, "_timestamp": 1_700_000_000.0 + s as f64, "loss": 1.0 / (s + 1) as f64})))
            .collect()
    }

    fn remote(id: &str, state: &str) -> RemoteRun {
        let mut run = RemoteRun::new(id, &format!("{id}-name"), state, "e", "p");
        run.config.insert("lr".into(), json!(0.01));
        run
    }

    fn three_run_source() -> StaticSource {
        StaticSource::new()
            .with_run(remote("r1", "finished"), history(2))
            .with_run(remote("r2", "running"), history(3))
            .with_run(remote("r3", "crashed"), history(1))
    }

    #[test]
    fn test_select_updated_runs() {
        let runs = vec![
            remote("new", "running"),
            remote("done", "finished"),
            remote("live", "running"),
            remote("dead", "crashed"),
        ];
        let stored: HashMap<String, RunState> = [
            ("done".to_string(), RunState::Finished),
            ("live".to_string(), RunState::Running),
            ("dead".to_string(), RunState::Crashed),
        ]
        .into();

        let ids: Vec<&str> = select_updated_runs(&runs, &stored, false)
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, ["new", "live", "dead"]);

        assert_eq!(select_updated_runs(&runs, &stored, true).len(), 4);
    }

    #[test]
    fn test_three_run_scenario() {
        let mut store = RunStore::open_memory().unwrap();

        let stats = {
            let mut downloader = Downloader::new(&mut store, three_run_source());
            downloader.download_project("e", "p", false, false).unwrap()
        };
        assert_eq!(stats.num_wandb_runs, 3);
        assert_eq!(stats.num_stored_runs, 0);
        assert_eq!(stats.num_new_runs, 3);
        assert_eq!(stats.num_updated_runs, 0);
        assert_eq!(stats.num_downloaded_histories, 3);
        assert_eq!(stats.num_downloaded_history_entries, 6);

        let mut source = three_run_source();
        source.set_state("r2", "finished");
        {
            let mut downloader = Downloader::new(&mut store, source);
            let stats = downloader.download_project("e", "p", false, false).unwrap();

            assert_eq!(stats.num_stored_runs, 3);
            assert_eq!(stats.num_new_runs, 0);
            // r2 was running, r3 crashed: both are re-fetched.
            assert_eq!(stats.num_updated_runs, 2);
            assert_eq!(stats.downloaded_run_ids, ["r2", "r3"]);
            assert_eq!(downloader.source().history_requests(), ["r2", "r3"]);
        }

        let r2 = store.get_run("r2").unwrap().unwrap();
        assert_eq!(r2.state, RunState::Finished);
    }

    #[test]
    fn test_only_running_run_is_refetched() {
        let source = StaticSource::new()
            .with_run(remote("a", "finished"), history(1))
            .with_run(remote("b", "running"), history(2))
            .with_run(remote("c", "finished"), history(1));
        let mut store = RunStore::open_memory().unwrap();

        let first = Downloader::new(&mut store, source.clone())
            .download_project("e", "p", false, false)
            .unwrap();
        assert_eq!((first.num_new_runs, first.num_updated_runs), (3, 0));
        assert_eq!(
            store
                .get_runs(&RunFilter::all(), &ComponentSelection::None)
                .unwrap()
                .len(),
            3
        );

        let second = Downloader::new(&mut store, source)
            .download_project("e", "p", false, false)
            .unwrap();
        assert_eq!((second.num_new_runs, second.num_updated_runs), (0, 1));
        assert_eq!(second.downloaded_run_ids, ["b"]);
    }

    #[test]
    fn test_second_download_of_finished_runs_is_noop() {
        let source = StaticSource::new()
            .with_run(remote("a", "finished"), history(2))
            .with_run(remote("b", "finished"), history(2));
        let mut store = RunStore::open_memory().unwrap();

        Downloader::new(&mut store, source.clone())
            .download_project("e", "p", false, false)
            .unwrap();
        let before = store.get_history(&RunFilter::all()).unwrap();

        {
            let mut downloader = Downloader::new(&mut store, source);
            let stats = downloader.download_project("e", "p", false, false).unwrap();
            assert!(stats.is_empty());
            assert!(downloader.source().history_requests().is_empty());
        }

        let after = store.get_history(&RunFilter::all()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_force_refresh_downloads_everything() {
        let source = StaticSource::new()
            .with_run(remote("a", "finished"), history(2))
            .with_run(remote("b", "finished"), history(2));
        let mut store = RunStore::open_memory().unwrap();
        Downloader::new(&mut store, source.clone())
            .download_project("e", "p", false, false)
            .unwrap();

        let stats = Downloader::new(&mut store, source)
            .download_project("e", "p", false, true)
            .unwrap();
        assert_eq!(stats.num_updated_runs, 2);
        assert_eq!(stats.num_downloaded_history_entries, 4);
        assert_eq!(store.count_history(&RunFilter::all()).unwrap(), 4);
    }

    #[test]
    fn test_runs_only_skips_history() {
        let mut store = RunStore::open_memory().unwrap();
        {
            let mut downloader = Downloader::new(&mut store, three_run_source());
            let stats = downloader.download_project("e", "p", true, false).unwrap();

            assert_eq!(stats.num_new_runs, 3);
            assert_eq!(stats.num_downloaded_histories, 0);
            assert!(downloader.source().history_requests().is_empty());
        }
        assert_eq!(store.count_history(&RunFilter::all()).unwrap(), 0);
    }

    #[test]
    fn test_failure_keeps_earlier_runs() {
        let mut source = three_run_source();
        source.fail_history_for("r2");
        let mut store = RunStore::open_memory().unwrap();

        let err = Downloader::new(&mut store, source)
            .download_project("e", "p", false, false)
            .unwrap_err();
        assert!(matches!(err, Error::Remote(_)));

        let runs = store
            .get_runs(&RunFilter::all(), &ComponentSelection::None)
            .unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
        // r2's run row commits before its history fetch fails; r3 is never reached.
        assert_eq!(ids, ["r1", "r2"]);
        assert_eq!(
            store
                .count_history(&RunFilter::all().with_run_ids(["r1"]))
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .count_history(&RunFilter::all().with_run_ids(["r2"]))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_unknown_remote_state_aborts() {
        let source = StaticSource::new().with_run(remote("a", "preempted"), vec![]);
        let mut store = RunStore::open_memory().unwrap();
        let err = Downloader::new(&mut store, source)
            .download_project("e", "p", false, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_progress_callback_and_reconciliation() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&calls);

        let mut store = RunStore::open_memory().unwrap();
        let mut downloader = Downloader::new(&mut store, three_run_source()).with_runs_per_page(0);
        assert_eq!(downloader.runs_per_page(), 1);
        downloader.set_progress_callback(move |index, total, name| {
            seen.borrow_mut().push((index, total, name.to_string()));
        });
        let stats = downloader.download_project("e", "p", false, false).unwrap();

        assert_eq!(
            *calls.borrow(),
            vec![
                (1, 3, "r1-name".to_string()),
                (2, 3, "r2-name".to_string()),
                (3, 3, "r3-name".to_string()),
            ]
        );
        assert!(stats.num_downloaded_runs() <= stats.downloaded_run_ids.len());
        assert!(stats.downloaded_run_ids.len() <= stats.num_wandb_runs);
    }

    #[test]
    fn test_other_projects_do_not_count_as_stored() {
        let mut store = RunStore::open_memory().unwrap();
        let mut other = crate::model::Run::new("r1", "x", RunState::Finished, "e", "other");
        other.config.insert("k".into(), json!(1));
        store.store_run(&other).unwrap();

        let stats = Downloader::new(&mut store, three_run_source())
            .download_project("e", "p", true, false)
            .unwrap();
        assert_eq!(stats.num_stored_runs, 0);
        // run_id is the global key, so r1 overwrites the other project's row.
        assert_eq!(stats.num_new_runs, 2);
        assert_eq!(stats.num_updated_runs, 1);
    }
}
