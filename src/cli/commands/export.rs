//! Export command implementation.

use std::path::PathBuf;

use colored::Colorize;

use super::{open_existing_store, output_dir};
use crate::cli::ExportArgs;
use crate::error::Result;
use crate::storage::RunFilter;
use crate::sync::Exporter;

/// Write Parquet snapshots of the stored runs matching `--filter`.
///
/// # Errors
///
/// Returns an error for malformed filters (before the database is touched),
/// a missing database, or any storage or export error.
pub fn execute(args: &ExportArgs, db_path: Option<&PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let filter = RunFilter::parse_args(&args.filters)?;
    let store = open_existing_store(db_path)?;
    let dir = output_dir(args.output_dir.as_deref())?;

    let stats = Exporter::new(&store, dir.clone())
        .with_bases(&args.runs_base, &args.history_base)
        .export(&filter)?;

    if json {
        let output = serde_json::json!({
            "success": true,
            "output_dir": dir.display().to_string(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if quiet {
        // nothing
    } else if stats.is_empty() {
        println!("No runs matched; nothing exported.");
    } else {
        println!("{}", "Export complete".green().bold());
        println!("{stats}");
        println!();
        for file in &stats.files {
            println!("  {}", file.display().to_string().dimmed());
        }
    }

    Ok(())
}
