//! SQLite storage implementation.
//!
//! Every mutation goes through [`RunStore::mutate`], which wraps the work in
//! an IMMEDIATE transaction: committed on success, rolled back when the
//! transaction is dropped on any error path.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rusqlite::{params_from_iter, Connection, OptionalExtension, Row, Transaction};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    from_unix_micros, from_unix_nanos, to_unix_micros, to_unix_nanos, ComponentSelection, HistoryEntry, HistoryRow, JsonObject,
    Run, RunState,
};
use crate::storage::query::{build_query, QueryKind, RunFilter};
use crate::storage::schema::apply_schema;

/// Whether an upsert created or overwrote a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// SQLite-backed store for runs and their history.
#[derive(Debug)]
pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(timeout_ms.map_or(Duration::from_secs(5), Duration::from_millis))?;

        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation inside one IMMEDIATE transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let result = f(&tx)?;

        tx.commit()?;
        debug!(op, "committed");

        Ok(result)
    }

    // ==================
    // Run Operations
    // ==================

    /// Insert a run, or overwrite every non-key column of an existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding or the upsert fails.
    pub fn store_run(&mut self, run: &Run) -> Result<UpsertOutcome> {
        let now = chrono::Utc::now().timestamp_millis();
        let created_at = run.created_at.as_ref().map(to_unix_nanos).transpose()?;
        let config = serde_json::to_string(&run.config)?;
        let summary = serde_json::to_string(&run.summary)?;
        let metadata = serde_json::to_string(&run.metadata)?;
        let system_metrics = serde_json::to_string(&run.system_metrics)?;
        let system_attrs = serde_json::to_string(&run.system_attrs)?;
        let sweep_info = serde_json::to_string(&run.sweep_info)?;
        let extra = serde_json::to_string(&run.extra)?;

        self.mutate("store_run", |tx| {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM runs WHERE run_id = ?1",
                    [&run.run_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            tx.execute(
                "INSERT INTO runs (run_id, run_name, state, project, entity, created_at,
                                   config, summary, metadata, system_metrics, system_attrs,
                                   sweep_info, extra, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(run_id) DO UPDATE SET
                   run_name = excluded.run_name,
                   state = excluded.state,
                   project = excluded.project,
                   entity = excluded.entity,
                   created_at = excluded.created_at,
                   config = excluded.config,
                   summary = excluded.summary,
                   metadata = excluded.metadata,
                   system_metrics = excluded.system_metrics,
                   system_attrs = excluded.system_attrs,
                   sweep_info = excluded.sweep_info,
                   extra = excluded.extra,
                   synced_at = excluded.synced_at",
                rusqlite::params![
                    run.run_id,
                    run.run_name,
                    run.state,
                    run.project,
                    run.entity,
                    created_at,
                    config,
                    summary,
                    metadata,
                    system_metrics,
                    system_attrs,
                    sweep_info,
                    extra,
                    now,
                ],
            )?;

            Ok(if exists {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            })
        })
    }

    /// Get a run by ID with every component.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let filter = RunFilter::all().with_run_ids([run_id]);
        Ok(self
            .get_runs(&filter, &ComponentSelection::All)?
            .into_iter()
            .next())
    }

    /// List runs matching `filter`, reading only the selected components.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored JSON column is corrupt.
    pub fn get_runs(&self, filter: &RunFilter, selection: &ComponentSelection) -> Result<Vec<Run>> {
        let query = build_query(QueryKind::Runs, filter, selection);
        let mut stmt = self.conn.prepare(&query.sql)?;

        let rows = stmt.query_map(params_from_iter(query.params.iter()), |row| {
            map_run_row(row, selection)
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Map of `run_id → state` for runs matching `filter`.
    ///
    /// This is the read path the download diff depends on.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_existing_run_states(&self, filter: &RunFilter) -> Result<HashMap<String, RunState>> {
        let (where_sql, params) = filter.where_clause();
        let sql = format!("SELECT r.run_id, r.state FROM runs r{where_sql}");
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, RunState>(1)?))
        })?;

        rows.collect::<std::result::Result<HashMap<_, _>, _>>()
            .map_err(Error::from)
    }

    /// Number of runs per state for runs matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_runs_by_state(&self, filter: &RunFilter) -> Result<Vec<(RunState, usize)>> {
        let (where_sql, params) = filter.where_clause();
        let sql = format!(
            "SELECT r.state, COUNT(*) FROM runs r{where_sql} GROUP BY r.state ORDER BY r.state"
        );
        let mut stmt = self.conn.prepare(&sql)?;

        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let count: i64 = row.get(1)?;
            Ok((row.get::<_, RunState>(0)?, usize::try_from(count).unwrap_or(0)))
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ==================
    // History Operations
    // ==================

    /// Replace the whole history of one run.
    ///
    /// Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete or any insert fails; nothing is changed then.
    pub fn store_history(&mut self, run_id: &str, entries: Vec<JsonObject>) -> Result<usize> {
        self.store_histories(vec![(run_id.to_string(), entries)])
    }

    /// Replace the histories of several runs in a single transaction.
    ///
    /// Each batch deletes every existing row of its run before inserting the
    /// new entries. Reserved keys are split out per [`HistoryEntry::from_raw`].
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the whole call is rolled back.
    pub fn store_histories(&mut self, batches: Vec<(String, Vec<JsonObject>)>) -> Result<usize> {
        self.mutate("store_histories", |tx| {
            let mut inserted = 0;
            let mut insert = tx.prepare(
                "INSERT INTO history (run_id, step, timestamp, runtime, metadata, metrics)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for (run_id, entries) in batches {
                let deleted = tx.execute("DELETE FROM history WHERE run_id = ?1", [&run_id])?;
                debug!(run_id = %run_id, deleted, new = entries.len(), "replacing history");

                for raw in entries {
                    let entry = HistoryEntry::from_raw(&run_id, raw);
                    insert.execute(rusqlite::params![
                        entry.run_id,
                        entry.step,
                        entry.timestamp.as_ref().map(to_unix_micros),
                        entry.runtime,
                        serde_json::to_string(&entry.metadata)?,
                        serde_json::to_string(&entry.metrics)?,
                    ])?;
                    inserted += 1;
                }
            }

            Ok(inserted)
        })
    }

    /// History rows joined with their run, for runs matching `filter`.
    ///
    /// Ordered by run, then step, then insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored JSON column is corrupt.
    pub fn get_history(&self, filter: &RunFilter) -> Result<Vec<HistoryRow>> {
        let query = build_query(QueryKind::History, filter, &ComponentSelection::None);
        let mut stmt = self.conn.prepare(&query.sql)?;

        let rows = stmt.query_map(params_from_iter(query.params.iter()), map_history_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Number of history rows for runs matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_history(&self, filter: &RunFilter) -> Result<usize> {
        let (where_sql, params) = filter.where_clause();
        let sql = format!(
            "SELECT COUNT(*) FROM history h JOIN runs r ON h.run_id = r.run_id{where_sql}"
        );
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

// Helper to map run rows selected by `build_query(QueryKind::Runs, ..)`
fn map_run_row(row: &Row, selection: &ComponentSelection) -> rusqlite::Result<Run> {
    let created_at: Option<i64> = row.get("created_at")?;
    let mut run = Run::new(
        row.get::<_, String>("run_id")?,
        row.get::<_, String>("run_name")?,
        row.get::<_, RunState>("state")?,
        row.get::<_, String>("entity")?,
        row.get::<_, String>("project")?,
    );
    run.created_at = created_at.map(from_unix_nanos);

    for component in selection.components() {
        *run.component_mut(component) = json_column(row, component.as_str())?;
    }
    if selection.includes_extra() {
        run.extra = json_column(row, "extra")?;
    }

    Ok(run)
}

// Helper to map joined history rows
fn map_history_row(row: &Row) -> rusqlite::Result<HistoryRow> {
    let timestamp: Option<i64> = row.get(3)?;
    Ok(HistoryRow {
        entry: HistoryEntry {
            id: row.get(0)?,
            run_id: row.get(1)?,
            step: row.get(2)?,
            timestamp: timestamp.and_then(from_unix_micros),
            runtime: row.get(4)?,
            metadata: json_column(row, 5)?,
            metrics: json_column(row, 6)?,
        },
        run_name: row.get(7)?,
        project: row.get(8)?,
    })
}

fn json_column<I: rusqlite::RowIndex>(row: &Row, idx: I) -> rusqlite::Result<JsonObject> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}
