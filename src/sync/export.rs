//! Parquet export of stored runs and history.
//!
//! # Snapshot Mode
//!
//! Every export rewrites its files from the current store contents. Files
//! are replaced atomically and never appended to.
//!
//! # Files
//!
//! - `<runs_base>_<component>.parquet`: standard run columns plus one column
//!   per top-level key of the component, one row per matching run (runs
//!   without content get nulls); skipped when no run has content
//! - `<runs_base>.parquet`: every run with components as JSON text
//! - `<history_base>.parquet`: history rows with one column per metric

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::model::{to_unix_micros, ComponentSelection, JsonObject, Run, RunComponent};
use crate::storage::{RunFilter, RunStore};
use crate::sync::file::{atomic_write_parquet, parquet_path};
use crate::sync::table::TableBuilder;
use crate::sync::types::ExportStats;

/// Default base name of run files.
pub const DEFAULT_RUNS_BASE: &str = "runs_metadata";

/// Default base name of the history file.
pub const DEFAULT_HISTORY_BASE: &str = "runs_history";

/// Writes Parquet snapshots of a [`RunStore`].
pub struct Exporter<'a> {
    store: &'a RunStore,
    output_dir: PathBuf,
    runs_base: String,
    history_base: String,
}

impl<'a> Exporter<'a> {
    #[must_use]
    pub fn new(store: &'a RunStore, output_dir: PathBuf) -> Self {
        Self {
            store,
            output_dir,
            runs_base: DEFAULT_RUNS_BASE.to_string(),
            history_base: DEFAULT_HISTORY_BASE.to_string(),
        }
    }

    /// Override the file base names.
    #[must_use]
    pub fn with_bases(mut self, runs_base: &str, history_base: &str) -> Self {
        self.runs_base = runs_base.to_string();
        self.history_base = history_base.to_string();
        self
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Export runs and history matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns storage errors, or export errors if a table cannot be built
    /// or written. Files written before the failure stay in place.
    pub fn export(&self, filter: &RunFilter) -> Result<ExportStats> {
        let mut stats = ExportStats::default();

        for component in RunComponent::ALL {
            self.export_component(component, filter, &mut stats)?;
        }
        self.export_runs_snapshot(filter, &mut stats)?;
        self.export_history_snapshot(filter, &mut stats)?;

        info!(
            dir = %self.output_dir.display(),
            runs = stats.runs,
            history_entries = stats.history_entries,
            files = stats.files.len(),
            "export finished"
        );
        Ok(stats)
    }

    fn export_component(
        &self,
        component: RunComponent,
        filter: &RunFilter,
        stats: &mut ExportStats,
    ) -> Result<()> {
        let runs = self
            .store
            .get_runs(filter, &ComponentSelection::only(component))?;
        if runs.iter().all(|run| run.component(component).is_empty()) {
            debug!(component = component.as_str(), "no content, skipped");
            stats.skipped.push(component.as_str().to_string());
            return Ok(());
        }

        let runs: Vec<&Run> = runs.iter().collect();
        let mut table = TableBuilder::new();
        push_run_columns(&mut table, &runs);
        let values: Vec<&JsonObject> = runs.iter().map(|run| run.component(component)).collect();
        table.push_flattened(component.as_str(), &values);

        let base = format!("{}_{}", self.runs_base, component.as_str());
        self.write(&base, &table.finish()?, stats)
    }

    fn export_runs_snapshot(&self, filter: &RunFilter, stats: &mut ExportStats) -> Result<()> {
        let runs = self.store.get_runs(filter, &ComponentSelection::All)?;
        if runs.is_empty() {
            return Ok(());
        }
        let runs: Vec<&Run> = runs.iter().collect();

        let mut table = TableBuilder::new();
        push_run_columns(&mut table, &runs);
        for component in RunComponent::ALL {
            let values: Vec<&JsonObject> =
                runs.iter().map(|run| run.component(component)).collect();
            table.push_json_text(component.as_str(), &values);
        }
        let extra: Vec<&JsonObject> = runs.iter().map(|run| &run.extra).collect();
        table.push_json_text("extra", &extra);

        stats.runs = runs.len();
        self.write(&self.runs_base, &table.finish()?, stats)
    }

    fn export_history_snapshot(&self, filter: &RunFilter, stats: &mut ExportStats) -> Result<()> {
        let rows = self.store.get_history(filter)?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut table = TableBuilder::new();
        table.push_i64("id", rows.iter().map(|r| r.entry.id).collect());
        table.push_utf8("run_id", &text_column(&rows, |r| r.entry.run_id.as_str()));
        table.push_utf8("run_name", &text_column(&rows, |r| r.run_name.as_str()));
        table.push_utf8("project", &text_column(&rows, |r| r.project.as_str()));
        table.push_i64("step", rows.iter().map(|r| r.entry.step).collect());
        table.push_timestamp(
            "timestamp",
            rows.iter()
                .map(|r| r.entry.timestamp.as_ref().map(to_unix_micros))
                .collect(),
        );
        table.push_f64("runtime", rows.iter().map(|r| r.entry.runtime).collect());
        let metadata: Vec<&JsonObject> = rows.iter().map(|r| &r.entry.metadata).collect();
        table.push_json_text("metadata", &metadata);
        let metrics: Vec<&JsonObject> = rows.iter().map(|r| &r.entry.metrics).collect();
        table.push_flattened("metrics", &metrics);

        stats.history_entries = rows.len();
        self.write(&self.history_base, &table.finish()?, stats)
    }

    fn write(
        &self,
        base: &str,
        batch: &arrow::record_batch::RecordBatch,
        stats: &mut ExportStats,
    ) -> Result<()> {
        let path = parquet_path(&self.output_dir, base);
        atomic_write_parquet(&path, batch)?;
        debug!(path = %path.display(), rows = batch.num_rows(), "parquet written");
        stats.files.push(path);
        Ok(())
    }
}

fn text_column<'r, T: 'r>(
    rows: impl IntoIterator<Item = &'r T>,
    get: fn(&'r T) -> &'r str,
) -> Vec<Option<&'r str>> {
    rows.into_iter().map(|row| Some(get(row))).collect()
}

/// Standard run columns: `run_id, run_name, state, project, entity, created_at`.
fn push_run_columns(table: &mut TableBuilder, runs: &[&Run]) {
    let runs = || runs.iter().copied();
    table.push_utf8("run_id", &text_column(runs(), |r| r.run_id.as_str()));
    table.push_utf8("run_name", &text_column(runs(), |r| r.run_name.as_str()));
    table.push_utf8("state", &text_column(runs(), |r| r.state.as_str()));
    table.push_utf8("project", &text_column(runs(), |r| r.project.as_str()));
    table.push_utf8("entity", &text_column(runs(), |r| r.entity.as_str()));
    table.push_timestamp(
        "created_at",
        runs()
            .map(|run| run.created_at.as_ref().map(to_unix_micros))
            .collect(),
    );
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use arrow::array::{Array, Float64Array, Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use super::*;
    use crate::model::RunState;

    fn obj(value: Value) -> JsonObject {
        value.as_object().unwrap().clone()
    }

    fn read(path: &Path) -> RecordBatch {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let mut batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        batches.remove(0)
    }

    fn column_names(batch: &RecordBatch) -> Vec<String> {
        batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Two runs: `with-history` has config, summary and three history rows;
    /// `no-history` has config only.
    fn seeded_store() -> RunStore {
        let mut store = RunStore::open_memory().unwrap();

        let mut a = Run::new("with-history", "alpha", RunState::Finished, "e", "p");
        a.config = obj(json!({"lr": 0.01, "layers": 4}));
        a.summary = obj(json!({"loss": 0.1}));
        store.store_run(&a).unwrap();
        store
            .store_history(
                "with-history",
                vec![
                    obj(json!({"_step": 0, "_timestamp": 1_700_000_000.5, "loss": 1.0})),
                    obj(json!({"_step": 1, "_runtime": 3.5, "loss": 0.5, "acc": 0.7})),
                    obj(json!({"_step": 2, "loss": 0.25, "tag": "x"})),
                ],
            )
            .unwrap();

        let mut b = Run::new("no-history", "beta", RunState::Running, "e", "p");
        b.config = obj(json!({"lr": 0.02, "layers": 8, "notes": "wide"}));
        store.store_run(&b).unwrap();

        store
    }

    #[test]
    fn test_export_writes_snapshots_and_skips_empty_components() {
        let store = seeded_store();
        let temp_dir = TempDir::new().unwrap();
        let exporter = Exporter::new(&store, temp_dir.path().to_path_buf());

        let stats = exporter.export(&RunFilter::all()).unwrap();

        assert_eq!(stats.runs, 2);
        assert_eq!(stats.history_entries, 3);
        assert_eq!(
            stats.skipped,
            ["metadata", "system_metrics", "system_attrs", "sweep_info"]
        );

        let dir = temp_dir.path();
        assert!(dir.join("runs_metadata.parquet").exists());
        assert!(dir.join("runs_history.parquet").exists());
        assert!(dir.join("runs_metadata_config.parquet").exists());
        assert!(dir.join("runs_metadata_summary.parquet").exists());
        assert!(!dir.join("runs_metadata_sweep_info.parquet").exists());
        assert_eq!(stats.files.len(), 4);
    }

    #[test]
    fn test_component_file_columns() {
        let store = seeded_store();
        let temp_dir = TempDir::new().unwrap();
        Exporter::new(&store, temp_dir.path().to_path_buf())
            .export(&RunFilter::all())
            .unwrap();

        let config = read(&temp_dir.path().join("runs_metadata_config.parquet"));
        assert_eq!(config.num_rows(), 2);
        assert_eq!(
            column_names(&config),
            ["run_id", "run_name", "state", "project", "entity", "created_at", "layers", "lr", "notes"]
        );
        let layers = config.column(6).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(layers.values().to_vec(), vec![8, 4]);

        // Runs without summary content keep their row with null columns.
        let summary = read(&temp_dir.path().join("runs_metadata_summary.parquet"));
        assert_eq!(summary.num_rows(), 2);
        let run_ids = summary.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        let loss = summary.column(6).as_any().downcast_ref::<Float64Array>().unwrap();
        for row in 0..summary.num_rows() {
            match run_ids.value(row) {
                "with-history" => assert!((loss.value(row) - 0.1).abs() < f64::EPSILON),
                "no-history" => assert!(loss.is_null(row)),
                other => panic!("unexpected run {other}"),
            }
        }
    }

    #[test]
    fn test_history_file_columns() {
        let store = seeded_store();
        let temp_dir = TempDir::new().unwrap();
        Exporter::new(&store, temp_dir.path().to_path_buf())
            .export(&RunFilter::all())
            .unwrap();

        let history = read(&temp_dir.path().join("runs_history.parquet"));
        assert_eq!(history.num_rows(), 3);
        assert_eq!(
            column_names(&history),
            [
                "id", "run_id", "run_name", "project", "step", "timestamp", "runtime", "metadata",
                "acc", "loss", "tag"
            ]
        );

        let loss = history.column(9).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(loss.values().to_vec(), vec![1.0, 0.5, 0.25]);
        let acc = history.column(8).as_any().downcast_ref::<Float64Array>().unwrap();
        assert!(acc.is_null(0));
        let names = history.column(2).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "alpha");
    }

    #[test]
    fn test_export_overwrites_previous_files() {
        let mut store = seeded_store();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("runs_history.parquet");

        Exporter::new(&store, temp_dir.path().to_path_buf())
            .export(&RunFilter::all())
            .unwrap();
        assert_eq!(read(&path).num_rows(), 3);

        store
            .store_history("with-history", vec![obj(json!({"_step": 9, "loss": 0.0}))])
            .unwrap();
        Exporter::new(&store, temp_dir.path().to_path_buf())
            .export(&RunFilter::all())
            .unwrap();
        assert_eq!(read(&path).num_rows(), 1);
    }

    #[test]
    fn test_export_filtered_with_custom_bases() {
        let store = seeded_store();
        let temp_dir = TempDir::new().unwrap();
        let stats = Exporter::new(&store, temp_dir.path().to_path_buf())
            .with_bases("runs", "hist")
            .export(&RunFilter::all().with_state(RunState::Running))
            .unwrap();

        assert_eq!(stats.runs, 1);
        assert_eq!(stats.history_entries, 0);
        assert!(temp_dir.path().join("runs.parquet").exists());
        assert!(temp_dir.path().join("runs_config.parquet").exists());
        assert!(!temp_dir.path().join("hist.parquet").exists());
        assert!(stats.skipped.contains(&"summary".to_string()));
    }

    #[test]
    fn test_export_empty_store_writes_nothing() {
        let store = RunStore::open_memory().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let stats = Exporter::new(&store, temp_dir.path().to_path_buf())
            .export(&RunFilter::all())
            .unwrap();
        assert!(stats.is_empty());
        assert_eq!(stats.skipped.len(), RunComponent::ALL.len());
    }
}
