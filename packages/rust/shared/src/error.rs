//! Error types for SchoolIntel.
//!
//! Library crates use [`SchoolIntelError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all SchoolIntel operations.
#[derive(Debug, thiserror::Error)]
pub enum SchoolIntelError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while searching or fetching pages.
    #[error("network error: {0}")]
    Network(String),

    /// HTML/PDF parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Cache/storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Language-model extraction error (API, transport, or response shape).
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (empty school name, bad URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// An enrichment stage could not produce a delta.
    #[error("stage {stage} failed: {message}")]
    Stage { stage: String, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SchoolIntelError>;

impl SchoolIntelError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a stage failure for the named stage.
    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
