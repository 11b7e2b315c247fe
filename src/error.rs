//! Error types for dr-wandb.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 4=contract, 6=remote, 7=config, 8=export)
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dr-wandb operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    DatabaseNotFound,
    DatabaseError,

    // Contract violations (exit 4)
    InvalidFilter,
    InvalidComponent,
    InvalidState,
    InvalidArgument,

    // Remote source (exit 6)
    RemoteError,
    Unauthorized,

    // Config (exit 7)
    ConfigError,
    MissingIdentifier,

    // Export / I/O (exit 8)
    IoError,
    JsonError,
    ExportError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseNotFound => "DATABASE_NOT_FOUND",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::InvalidFilter => "INVALID_FILTER",
            Self::InvalidComponent => "INVALID_COMPONENT",
            Self::InvalidState => "INVALID_STATE",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::RemoteError => "REMOTE_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::MissingIdentifier => "MISSING_IDENTIFIER",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::ExportError => "EXPORT_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::DatabaseNotFound | Self::DatabaseError => 2,
            Self::InvalidFilter
            | Self::InvalidComponent
            | Self::InvalidState
            | Self::InvalidArgument => 4,
            Self::RemoteError | Self::Unauthorized => 6,
            Self::ConfigError | Self::MissingIdentifier => 7,
            Self::IoError | Self::JsonError | Self::ExportError => 8,
        }
    }

    /// Whether the failure is a caller/programming error rather than an
    /// environment or runtime failure.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidFilter | Self::InvalidComponent | Self::InvalidState | Self::InvalidArgument
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in dr-wandb operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database not found at {path}")]
    DatabaseNotFound { path: PathBuf },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unsupported filter key '{key}' (expected one of: project, entity, state, run_ids)")]
    InvalidFilter { key: String },

    #[error("Invalid filter value for '{key}': {reason}")]
    InvalidFilterValue { key: String, reason: String },

    #[error("Invalid component selection: {0}")]
    InvalidComponent(String),

    #[error("Unknown run state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("W&B authorization failed: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required identifier {0}: --entity and --project are required")]
    MissingIdentifier(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::DatabaseNotFound { .. } => ErrorCode::DatabaseNotFound,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::InvalidFilter { .. } | Self::InvalidFilterValue { .. } => {
                ErrorCode::InvalidFilter
            }
            Self::InvalidComponent(_) => ErrorCode::InvalidComponent,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Remote(_) | Self::Http(_) => ErrorCode::RemoteError,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::MissingIdentifier(_) => ErrorCode::MissingIdentifier,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Parquet(_) | Self::Arrow(_) => ErrorCode::ExportError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::DatabaseNotFound { path } => Some(format!(
                "No database at {}. Run `dr-wandb download --entity <e> --project <p>` first.",
                path.display()
            )),

            Self::InvalidFilter { .. } | Self::InvalidFilterValue { .. } => Some(
                "Filters look like `--filter state=finished` or `--filter run_ids=a,b,c`"
                    .to_string(),
            ),

            Self::InvalidComponent(_) => Some(
                "Valid components: config, summary, metadata, system_metrics, system_attrs, \
                 sweep_info (or `all` / `none` on their own)"
                    .to_string(),
            ),

            Self::InvalidState(_) => {
                Some("Valid states: finished, running, crashed, failed, killed".to_string())
            }

            Self::Unauthorized(_) => Some(
                "Run `wandb login` or set the WANDB_API_KEY environment variable".to_string(),
            ),

            Self::MissingIdentifier(_) => Some(
                "Pass --entity and --project, or set DR_WANDB_ENTITY / DR_WANDB_PROJECT"
                    .to_string(),
            ),

            Self::Database(_)
            | Self::InvalidArgument(_)
            | Self::Remote(_)
            | Self::Http(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Parquet(_)
            | Self::Arrow(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "contract_violation": code.is_contract_violation(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
