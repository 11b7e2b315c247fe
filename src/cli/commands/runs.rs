//! Runs command implementation.
//!
//! Prints one JSON object per stored run. Components are nested under their
//! own name; `--include` narrows which ones are read from the database.

use std::io::{self, Write};
use std::path::PathBuf;

use super::open_existing_store;
use crate::cli::RunsArgs;
use crate::error::Result;
use crate::model::ComponentSelection;
use crate::storage::RunFilter;

/// Execute the runs command.
///
/// # Errors
///
/// Returns an error for malformed filters or include names (before the
/// database is touched), a missing database, or a storage error.
pub fn execute(args: &RunsArgs, db_path: Option<&PathBuf>) -> Result<()> {
    let filter = RunFilter::parse_args(&args.filters)?;
    let selection = if args.include.is_empty() {
        ComponentSelection::All
    } else {
        ComponentSelection::parse(&args.include)?
    };

    let store = open_existing_store(db_path)?;
    let runs = store.get_runs(&filter, &selection)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for run in &runs {
        serde_json::to_writer(&mut out, &run.to_json(&selection))?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
