//! Result counters for downloads and exports.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Counters for one `download_project` call.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    /// Runs reported by the remote.
    pub num_wandb_runs: usize,
    /// Runs in the store for the project before the download.
    pub num_stored_runs: usize,
    pub num_new_runs: usize,
    pub num_updated_runs: usize,
    pub num_downloaded_histories: usize,
    pub num_downloaded_history_entries: usize,
    /// Ids of the runs written, in processing order.
    pub downloaded_run_ids: Vec<String>,
}

impl DownloadStats {
    /// Runs written by this download.
    #[must_use]
    pub fn num_downloaded_runs(&self) -> usize {
        self.num_new_runs + self.num_updated_runs
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_downloaded_runs() == 0
    }
}

impl fmt::Display for DownloadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ":: Downloader Stats ::")?;
        writeln!(f, " - # WandB runs: {}", thousands(self.num_wandb_runs))?;
        writeln!(f, " - # Stored runs: {}", thousands(self.num_stored_runs))?;
        writeln!(f, " - # New runs: {}", thousands(self.num_new_runs))?;
        writeln!(f, " - # Updated runs: {}", thousands(self.num_updated_runs))?;
        writeln!(
            f,
            " - # Downloaded histories: {}",
            thousands(self.num_downloaded_histories)
        )?;
        write!(
            f,
            " - # Downloaded history entries: {}",
            thousands(self.num_downloaded_history_entries)
        )
    }
}

/// Statistics for an export operation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    /// Runs written to the full snapshot.
    pub runs: usize,
    /// Rows written to the history snapshot.
    pub history_entries: usize,
    /// Files written, in write order.
    pub files: Vec<PathBuf>,
    /// Components with no content in any matching run.
    pub skipped: Vec<String>,
}

impl ExportStats {
    /// Returns true if no file was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl fmt::Display for ExportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ":: Export Stats ::")?;
        writeln!(f, " - # Runs: {}", thousands(self.runs))?;
        writeln!(f, " - # History entries: {}", thousands(self.history_entries))?;
        write!(f, " - # Files: {}", self.files.len())?;
        if !self.skipped.is_empty() {
            write!(f, "\n - Skipped (empty): {}", self.skipped.join(", "))?;
        }
        Ok(())
    }
}

/// `1234567` -> `1,234,567`.
#[must_use]
pub fn thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
