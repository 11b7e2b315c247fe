//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{DB_ENV, ENTITY_ENV, OUTPUT_DIR_ENV, PROJECT_ENV};
use crate::sync::{DEFAULT_HISTORY_BASE, DEFAULT_RUNS_BASE, DEFAULT_RUNS_PER_PAGE};

pub mod commands;

/// dr-wandb - Incremental W&B run and history sync with Parquet export
#[derive(Parser, Debug)]
#[command(name = "dr-wandb", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.dr_wandb/data/wandb.db)
    #[arg(long, global = true, env = DB_ENV)]
    pub db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download new and unfinished runs of a project, then export
    Download(DownloadArgs),

    /// Export stored runs and history to Parquet
    Export(ExportArgs),

    /// Print stored runs as JSON lines
    Runs(RunsArgs),

    /// Show stored run counts by state
    Status(StatusArgs),

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// W&B entity (user or team)
    #[arg(long, env = ENTITY_ENV)]
    pub entity: Option<String>,

    /// W&B project
    #[arg(long, env = PROJECT_ENV)]
    pub project: Option<String>,

    /// Skip history download
    #[arg(long)]
    pub runs_only: bool,

    /// Re-download every run, including finished ones
    #[arg(long)]
    pub force_refresh: bool,

    /// Runs requested per API page
    #[arg(long, default_value_t = DEFAULT_RUNS_PER_PAGE)]
    pub runs_per_page: usize,

    /// Export directory (default: ~/.dr_wandb/exports)
    #[arg(long, env = OUTPUT_DIR_ENV)]
    pub output_dir: Option<PathBuf>,

    /// Do not export after downloading
    #[arg(long)]
    pub no_export: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Export directory (default: ~/.dr_wandb/exports)
    #[arg(long, env = OUTPUT_DIR_ENV)]
    pub output_dir: Option<PathBuf>,

    /// Restrict exported runs (project, entity, state, run_ids)
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Base name of run files
    #[arg(long, default_value = DEFAULT_RUNS_BASE)]
    pub runs_base: String,

    /// Base name of the history file
    #[arg(long, default_value = DEFAULT_HISTORY_BASE)]
    pub history_base: String,
}

#[derive(Args, Debug)]
pub struct RunsArgs {
    /// Restrict runs (project, entity, state, run_ids)
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Components to include (default: all)
    #[arg(long = "include", value_name = "COMPONENT", value_delimiter = ',')]
    pub include: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Restrict counted runs (project, entity, state, run_ids)
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,
}
