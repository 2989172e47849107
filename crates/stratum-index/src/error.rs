//! Error types for index engine operations.

use thiserror::Error;

/// Result type alias for index engine operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur during index dump and collection operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The backing catalog could not be queried or updated.
    #[error("catalog error: {message}")]
    Catalog {
        /// Description of the catalog failure.
        message: String,
    },

    /// Resource not found.
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },
}

impl From<stratum_core::Error> for IndexError {
    fn from(e: stratum_core::Error) -> Self {
        match e {
            stratum_core::Error::NotFound(message) => Self::NotFound { message },
            stratum_core::Error::Serialization { message } => Self::Serialization { message },
            other => Self::Storage {
                message: other.to_string(),
            },
        }
    }
}
