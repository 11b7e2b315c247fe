//! Command implementations.

pub mod completions;
pub mod download;
pub mod export;
pub mod runs;
pub mod status;
pub mod version;

use std::path::{Path, PathBuf};

use crate::config::{resolve_db_path, resolve_output_dir};
use crate::error::{Error, Result};
use crate::storage::RunStore;

fn db_path(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    resolve_db_path(explicit.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("could not determine the home directory".to_string()))
}

/// Open the store, creating the database if needed.
fn open_store(explicit: Option<&PathBuf>) -> Result<RunStore> {
    RunStore::open(&db_path(explicit)?)
}

/// Open an existing store; read-only commands never create one.
fn open_existing_store(explicit: Option<&PathBuf>) -> Result<RunStore> {
    let path = db_path(explicit)?;
    if !path.exists() {
        return Err(Error::DatabaseNotFound { path });
    }
    RunStore::open(&path)
}

fn output_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    resolve_output_dir(explicit)
        .ok_or_else(|| Error::Config("could not determine the export directory".to_string()))
}
