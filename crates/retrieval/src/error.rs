//! Retrieval errors.

use taskflow_storage::StorageError;

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur during retrieval.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The search capability could not be reached in time
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),

    /// The search capability answered with something unusable
    #[error("invalid retrieval response: {0}")]
    InvalidResponse(String),

    /// Local history could not be read
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RetrievalError {
    /// Whether the error means the capability is down rather than broken.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RetrievalError::Unavailable(_))
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RetrievalError::InvalidResponse(e.to_string())
        } else {
            RetrievalError::Unavailable(e.to_string())
        }
    }
}
