//! Error types for BuildLedger.
//!
//! Library crates use [`BuildLedgerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all BuildLedger operations.
#[derive(Debug, thiserror::Error)]
pub enum BuildLedgerError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to the commit-history service.
    #[error("network error: {0}")]
    Network(String),

    /// Input that could not be parsed (tool output, timestamps, JSON).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error, including unscannable rows.
    #[error("storage error: {0}")]
    Storage(String),

    /// Commit-history lookup error (unsupported import path, bad response).
    #[error("lookup error: {0}")]
    Lookup(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record failed required-field validation.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BuildLedgerError>;

impl BuildLedgerError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BuildLedgerError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = BuildLedgerError::validation("Hostname cannot be blank");
        assert!(err.to_string().contains("Hostname"));

        let err = BuildLedgerError::Lookup("not a github repo".into());
        assert_eq!(err.to_string(), "lookup error: not a github repo");
    }
}
