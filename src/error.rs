//! Error types for ipatool-dl
//!
//! This module provides error handling for the library, including:
//! - Tool invocation errors (missing binary, non-zero exit, undecodable output)
//! - Caller-side input validation errors
//! - Classification helpers for retry decisions (missing-license detection)

use thiserror::Error;

/// Result type alias for ipatool-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ipatool-dl
///
/// This is the primary error type used throughout the library. Each variant
/// includes enough context to be shown to an end user or matched on by a
/// front-end.
#[derive(Debug, Error)]
pub enum Error {
    /// The wrapped tool binary could not be located or is not executable
    #[error("ipatool binary not found: configure its path or install it on PATH")]
    ExecutableNotFound,

    /// The tool ran and exited non-zero; the message is its stderr output,
    /// or stdout when stderr was empty
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// The tool exited zero but produced no decodable structured output line
    #[error("could not decode tool output")]
    DecodingFailed,

    /// Caller-side validation failed before any subprocess was spawned
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error from the store catalog lookup
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Whether this failure means the account holds no license for the
    /// probed app.
    ///
    /// The wrapped tool reports this as an ordinary command failure whose
    /// message contains "license is required" (case varies between
    /// versions). Ownership probes use this to move on to the next probe
    /// instead of retrying.
    pub fn indicates_missing_license(&self) -> bool {
        match self {
            Error::CommandFailed(message) => {
                message.to_lowercase().contains("license is required")
            }
            _ => false,
        }
    }
}
