//! Atomic Parquet file writes.
//!
//! Files are written to a temporary sibling, synced to disk, then renamed
//! over the target. A failed write leaves any previous file untouched.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::Result;

/// Parquet file extension.
pub const PARQUET_EXT: &str = "parquet";

/// `<dir>/<base>.parquet`
#[must_use]
pub fn parquet_path(dir: &Path, base: &str) -> PathBuf {
    dir.join(format!("{base}.{PARQUET_EXT}"))
}

/// Write a record batch to `path` atomically, replacing any existing file.
///
/// # Errors
///
/// Returns an error if the directory cannot be created, or if encoding,
/// writing or renaming fails.
pub fn atomic_write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let temp_path = path.with_extension("parquet.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let written = write_parquet(&temp_path, batch);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    let file = writer.into_inner()?;
    file.sync_all()?;
    Ok(())
}
