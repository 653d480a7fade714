//! Error types reported by storage collaborators.

use thiserror::Error;

/// A specialized Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors a storage query executor can report.
///
/// The engine never retries on these; they are handed back to whoever asked
/// for the fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The storage backend rejected the query text.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of what was wrong with the query.
        message: String,
    },

    /// The storage backend is unreachable or failed mid-query.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Description of the transport or storage failure.
        message: String,
    },
}

impl StorageError {
    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        StorageError::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        StorageError::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true if the same request might succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}
