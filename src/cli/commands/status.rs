//! Status command implementation.

use std::path::PathBuf;

use colored::Colorize;
use serde::Serialize;

use super::{db_path, open_existing_store};
use crate::cli::StatusArgs;
use crate::error::Result;
use crate::model::RunState;
use crate::storage::RunFilter;
use crate::sync::thousands;

/// Output for status command.
#[derive(Serialize)]
struct StatusOutput {
    database: String,
    runs: usize,
    by_state: Vec<StateCount>,
    history_entries: usize,
}

#[derive(Serialize)]
struct StateCount {
    state: RunState,
    count: usize,
}

/// Execute the status command.
///
/// # Errors
///
/// Returns an error for malformed filters, a missing database, or a storage
/// error.
pub fn execute(args: &StatusArgs, explicit_db: Option<&PathBuf>, json: bool) -> Result<()> {
    let filter = RunFilter::parse_args(&args.filters)?;
    let path = db_path(explicit_db)?;
    let store = open_existing_store(explicit_db)?;

    let by_state: Vec<StateCount> = store
        .count_runs_by_state(&filter)?
        .into_iter()
        .map(|(state, count)| StateCount { state, count })
        .collect();
    let output = StatusOutput {
        database: path.display().to_string(),
        runs: by_state.iter().map(|s| s.count).sum(),
        by_state,
        history_entries: store.count_history(&filter)?,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{} {}", "Database:".bold(), output.database);
    println!("{} {}", "Runs:".bold(), thousands(output.runs));
    for StateCount { state, count } in &output.by_state {
        let label = match state {
            RunState::Finished => state.as_str().green(),
            RunState::Running => state.as_str().cyan(),
            RunState::Crashed | RunState::Failed | RunState::Killed => state.as_str().red(),
        };
        println!("  {label:<10} {}", thousands(*count));
    }
    println!("{} {}", "History entries:".bold(), thousands(output.history_entries));
    Ok(())
}
