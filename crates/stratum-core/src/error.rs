//! Core error types.

use std::path::PathBuf;

use thiserror::Error;

/// Low-level store errors.
///
/// These never cross the migration boundary as-is: the planner, backup
/// manager and executor wrap them into [`crate::migration::MigrationError`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store (or one of its files) does not exist.
    #[error("store not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            StoreError::Io(err.into())
        } else if err.is_syntax() || err.is_eof() {
            StoreError::InvalidData(err.to_string())
        } else {
            StoreError::Serialization(err.to_string())
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
