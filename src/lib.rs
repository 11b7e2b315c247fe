//! dr-wandb - Incremental Weights & Biases sync into SQLite
//!
//! This crate provides the core functionality for the `dr-wandb` CLI tool:
//! download run metadata and metric history for a W&B project into a local
//! SQLite store, re-fetching only new or unfinished runs, and export the
//! store as Parquet snapshots.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (Run, RunState, HistoryEntry, component selection)
//! - [`remote`] - Remote source trait and the W&B GraphQL client
//! - [`storage`] - SQLite database layer and filtered queries
//! - [`sync`] - Incremental download and Parquet export
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod remote;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
