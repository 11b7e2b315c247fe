//! Database schema definitions.
//!
//! Two data tables: `runs` keyed by the remote run id, and `history` with a
//! surrogate integer key and a reference to its run.

use rusqlite::{Connection, Result};

/// Current schema version, recorded in `schema_migrations`.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the dr-wandb database.
///
/// `runs.created_at` is INTEGER unix nanoseconds, `history.timestamp` unix
/// microseconds and `synced_at` unix milliseconds. JSON components are
/// stored as TEXT objects.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    run_name TEXT NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('finished', 'running', 'crashed', 'failed', 'killed')),
    project TEXT NOT NULL,
    entity TEXT NOT NULL,
    created_at INTEGER,
    config TEXT NOT NULL DEFAULT '{}',
    summary TEXT NOT NULL DEFAULT '{}',
    metadata TEXT NOT NULL DEFAULT '{}',
    system_metrics TEXT NOT NULL DEFAULT '{}',
    system_attrs TEXT NOT NULL DEFAULT '{}',
    sweep_info TEXT NOT NULL DEFAULT '{}',
    extra TEXT NOT NULL DEFAULT '{}',
    synced_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_entity_project ON runs(entity, project);
CREATE INDEX IF NOT EXISTS idx_runs_state ON runs(state);

CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    step INTEGER,
    timestamp INTEGER,
    runtime REAL,
    metadata TEXT NOT NULL DEFAULT '{}',
    metrics TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_history_run_step ON history(run_id, step);
";

/// Apply pragmas and schema to a connection.
///
/// Idempotent; safe to call on every open.
///
/// # Errors
///
/// Returns an error if a pragma or DDL statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
