//! Configuration management.
//!
//! Resolves where data lives and how to reach the W&B API.
//!
//! # Layout
//!
//! - **Database**: `~/.dr_wandb/data/wandb.db`
//! - **Exports**: `~/.dr_wandb/exports/`
//!
//! Each location can be overridden by a CLI flag or an environment variable.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::remote::DEFAULT_BASE_URL;

/// Database path override.
pub const DB_ENV: &str = "DR_WANDB_DB";
/// Export directory override.
pub const OUTPUT_DIR_ENV: &str = "DR_WANDB_OUTPUT_DIR";
pub const ENTITY_ENV: &str = "DR_WANDB_ENTITY";
pub const PROJECT_ENV: &str = "DR_WANDB_PROJECT";
pub const API_KEY_ENV: &str = "WANDB_API_KEY";
pub const BASE_URL_ENV: &str = "WANDB_BASE_URL";

/// Get the global dr-wandb directory (`~/.dr_wandb/`).
#[must_use]
pub fn global_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".dr_wandb"))
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Resolve the database path.
///
/// Priority:
/// 1. `explicit_path` (the `--db` flag)
/// 2. `DR_WANDB_DB` environment variable
/// 3. `~/.dr_wandb/data/wandb.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    env_path(DB_ENV).or_else(|| global_dir().map(|dir| dir.join("data").join("wandb.db")))
}

/// Resolve the export directory.
///
/// Priority: `--output-dir`, then `DR_WANDB_OUTPUT_DIR`, then
/// `~/.dr_wandb/exports`.
#[must_use]
pub fn resolve_output_dir(explicit_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit_dir {
        return Some(dir.to_path_buf());
    }
    env_path(OUTPUT_DIR_ENV).or_else(|| global_dir().map(|dir| dir.join("exports")))
}

/// W&B API base URL from `WANDB_BASE_URL`, else the public host.
#[must_use]
pub fn resolve_base_url() -> String {
    std::env::var(BASE_URL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Resolve the W&B API key.
///
/// Priority:
/// 1. `WANDB_API_KEY` environment variable
/// 2. `~/.netrc` entry for the API host (written by `wandb login`)
///
/// # Errors
///
/// Returns `Error::Unauthorized` if no key is configured.
pub fn resolve_api_key(base_url: &str) -> Result<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }

    let netrc = env_path("NETRC").or_else(|| {
        directories::BaseDirs::new().map(|b| b.home_dir().join(".netrc"))
    });
    netrc
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| netrc_password(&content, host_of(base_url)))
        .ok_or_else(|| Error::Unauthorized("no API key configured".to_string()))
}

/// Host part of a URL: `https://api.wandb.ai:443/x` -> `api.wandb.ai`.
#[must_use]
pub fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', ':']).next().unwrap_or(rest)
}

/// Password of the `machine <host>` entry in netrc content.
#[must_use]
pub fn netrc_password(content: &str, host: &str) -> Option<String> {
    let mut tokens = content.split_whitespace();
    let mut in_machine = false;

    while let Some(token) = tokens.next() {
        match token {
            "machine" => in_machine = tokens.next() == Some(host),
            "default" => in_machine = false,
            "password" => {
                let value = tokens.next();
                if in_machine {
                    return value.map(String::from);
                }
            }
            "login" | "account" => {
                tokens.next();
            }
            _ => {}
        }
    }
    None
}

/// Require both project identifiers.
///
/// # Errors
///
/// Returns `Error::MissingIdentifier` naming the first missing flag.
pub fn require_identifiers(
    entity: Option<&str>,
    project: Option<&str>,
) -> Result<(String, String)> {
    let present = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(String::from);
    let entity = present(entity).ok_or(Error::MissingIdentifier("--entity"))?;
    let project = present(project).ok_or(Error::MissingIdentifier("--project"))?;
    Ok((entity, project))
}
