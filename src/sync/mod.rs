//! Remote sync and Parquet export.
//!
//! - **Download**: remote runs → SQLite, skipping runs already stored as
//!   `finished`
//! - **Export**: SQLite → Parquet snapshots (per component, full runs,
//!   history)
//!
//! # Example
//!
//! ```ignore
//! use dr_wandb::remote::WandbClient;
//! use dr_wandb::storage::{RunFilter, RunStore};
//! use dr_wandb::sync::{Downloader, Exporter};
//!
//! let mut store = RunStore::open(&db_path)?;
//! let client = WandbClient::new(&base_url, api_key)?;
//! let stats = Downloader::new(&mut store, client).download_project("team", "proj", false, false)?;
//! println!("{stats}");
//!
//! let exported = Exporter::new(&store, output_dir).export(&RunFilter::for_project("team", "proj"))?;
//! ```

mod downloader;
mod export;
mod file;
mod table;
mod types;

pub use downloader::{select_updated_runs, Downloader, ProgressCallback, DEFAULT_RUNS_PER_PAGE};
pub use export::{Exporter, DEFAULT_HISTORY_BASE, DEFAULT_RUNS_BASE};
pub use file::{atomic_write_parquet, parquet_path};
pub use table::{ColumnType, TableBuilder};
pub use types::{thousands, DownloadStats, ExportStats};
