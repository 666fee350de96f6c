//! Error types for ycsb-rs
//!
//! Two layers: [`DbError`] is the status an engine adapter reports for a
//! single call, [`Error`] is what the driver surfaces to its caller.

use thiserror::Error;

use crate::types::Operation;

/// Result type alias using the driver's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by engine adapter calls
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Status of a failed engine adapter call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Concurrent contention; the enclosing transaction may be retried
    #[error("Conflict detected: {0}")]
    Conflict(String),

    /// The engine does not implement the requested operation
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// The engine failed for a reason unrelated to contention
    #[error("Storage error: {0}")]
    Storage(String),
}

impl DbError {
    /// Whether the enclosing transaction should be retried
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::Conflict(_))
    }
}

/// Main error type for the benchmark driver
#[derive(Error, Debug)]
pub enum Error {
    // Adapter errors that are not retried
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    // The workload asked for something the client cannot issue
    #[error("Operation request is not recognized: {0}")]
    UnrecognizedOperation(Operation),

    #[error("Transaction gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u64 },

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        assert!(DbError::Conflict("busy".into()).is_conflict());
        assert!(!DbError::NotSupported("scan").is_conflict());
        assert!(!DbError::Storage("io".into()).is_conflict());
    }

    #[test]
    fn test_db_error_converts() {
        let err: Error = DbError::NotSupported("scan").into();
        assert!(matches!(err, Error::Db(DbError::NotSupported("scan"))));
        assert_eq!(
            err.to_string(),
            "Database error: Operation not supported: scan"
        );
    }
}
