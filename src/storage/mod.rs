//! SQLite storage layer for dr-wandb.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode and a busy timeout for a single writer
//! - Transaction discipline for atomic per-call writes
//! - Upsert-by-key for runs, replace-all for history
//!
//! # Submodules
//!
//! - [`query`] - Filters and query construction
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod query;
pub mod schema;
pub mod sqlite;

pub use query::{build_query, BuiltQuery, QueryKind, RunFilter, SUPPORTED_FILTER_KEYS};
pub use sqlite::{RunStore, UpsertOutcome};
