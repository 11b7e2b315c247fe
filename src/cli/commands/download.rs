//! Download command implementation.

use std::path::PathBuf;

use colored::Colorize;
use tracing::info;

use super::{open_store, output_dir};
use crate::cli::DownloadArgs;
use crate::config::{require_identifiers, resolve_api_key, resolve_base_url};
use crate::error::Result;
use crate::remote::WandbClient;
use crate::storage::RunFilter;
use crate::sync::{Downloader, Exporter};

/// Download a project, then export it unless `--no-export`.
///
/// # Errors
///
/// Returns configuration errors before any request is made, then the first
/// remote, storage or export error.
pub fn execute(
    args: &DownloadArgs,
    db_path: Option<&PathBuf>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let (entity, project) = require_identifiers(args.entity.as_deref(), args.project.as_deref())?;
    let base_url = resolve_base_url();
    let client = WandbClient::new(&base_url, resolve_api_key(&base_url)?)?;

    let mut store = open_store(db_path)?;
    info!(%entity, %project, %base_url, "downloading");

    let stats = {
        let mut downloader =
            Downloader::new(&mut store, client).with_runs_per_page(args.runs_per_page);
        if !json && !quiet {
            downloader.set_progress_callback(|index, total, name| {
                eprintln!("{} {name}", format!("[{index}/{total}]").dimmed());
            });
        }
        downloader.download_project(&entity, &project, args.runs_only, args.force_refresh)?
    };

    let export = if args.no_export {
        None
    } else {
        let dir = output_dir(args.output_dir.as_deref())?;
        Some(Exporter::new(&store, dir).export(&RunFilter::for_project(&entity, &project))?)
    };

    if json {
        let output = serde_json::json!({
            "success": true,
            "entity": entity,
            "project": project,
            "stats": stats,
            "export": export,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if !quiet {
        println!("{}", format!("{entity}/{project}").bold());
        println!("{stats}");
        if let Some(export) = export {
            println!();
            println!("{export}");
        }
    }

    Ok(())
}
