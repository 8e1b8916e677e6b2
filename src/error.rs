//! Error types for the csv index/query engine

use std::fmt;
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Bad request shape: unknown column, unparseable condition, UTF-16 CSV,
    /// non-positive memory budget, malformed JSON request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Index file is unusable: bad magic, footer length out of range,
    /// LZ4 decode failure, file shorter than the trailer.
    #[error("corrupt index: {0}")]
    Corrupt(String),

    /// No index matches the predicate; not fatal, callers fall back to a
    /// full scan.
    #[error("no matching index: {0}")]
    Missing(String),

    /// Transient read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server concurrency semaphore was exhausted during shutdown.
    #[error("capacity exhausted")]
    Capacity,

    /// CSV size/mtime/fingerprint mismatch against index metadata.
    #[error("integrity stale: {0}")]
    IntegrityStale(String),

    /// Catch-all for conditions that should be unreachable in a healthy
    /// build.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        Self::Missing(msg.into())
    }

    pub fn integrity_stale(msg: impl Into<String>) -> Self {
        Self::IntegrityStale(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether retrying the same operation unchanged could plausibly
    /// succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Capacity)
    }

    /// Coarse-grained category, useful for metrics and `explain` output.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidInput(_) => ErrorCategory::InvalidInput,
            Error::Corrupt(_) => ErrorCategory::Corrupt,
            Error::Missing(_) => ErrorCategory::Missing,
            Error::Io(_) => ErrorCategory::Io,
            Error::Capacity => ErrorCategory::Capacity,
            Error::IntegrityStale(_) => ErrorCategory::IntegrityStale,
            Error::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories, one per [`Error`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidInput,
    Corrupt,
    Missing,
    Io,
    Capacity,
    IntegrityStale,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::InvalidInput => "InvalidInput",
            ErrorCategory::Corrupt => "Corrupt",
            ErrorCategory::Missing => "Missing",
            ErrorCategory::Io => "Io",
            ErrorCategory::Capacity => "Capacity",
            ErrorCategory::IntegrityStale => "IntegrityStale",
            ErrorCategory::Internal => "Internal",
        };
        write!(f, "{name}")
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Corrupt(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_discriminants() {
        assert_eq!(Error::invalid_input("x").category(), ErrorCategory::InvalidInput);
        assert_eq!(Error::corrupt("x").category(), ErrorCategory::Corrupt);
        assert_eq!(Error::missing("x").category(), ErrorCategory::Missing);
        assert_eq!(
            Error::integrity_stale("x").category(),
            ErrorCategory::IntegrityStale
        );
    }

    #[test]
    fn recoverability() {
        assert!(Error::Capacity.is_recoverable());
        assert!(!Error::corrupt("x").is_recoverable());
        assert!(!Error::invalid_input("x").is_recoverable());
    }
}
