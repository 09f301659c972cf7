//! Error types for storage operations.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store could not be reached.
    #[error("column store unavailable: {0}")]
    Unavailable(String),

    /// A column family was used before it was created.
    #[error("unknown column family: {0}")]
    UnknownColumnFamily(String),

    /// A lock could not be acquired in time.
    #[error("timed out after {timeout:?} acquiring lock '{key}'")]
    LockTimeout {
        /// The lock key.
        key: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// Stored data could not be interpreted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::LockTimeout { .. })
    }
}
