//! Error types for the retry processor and worker.

use parcelhook_core::CoreError;
use thiserror::Error;

/// Result type alias for retry operations.
pub type Result<T> = std::result::Result<T, RetryError>;

/// Errors surfaced by retry processing.
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// The retry store could not be queried.
    #[error("retry store error: {0}")]
    Storage(#[from] CoreError),

    /// Policy values are out of range.
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),
}

impl RetryError {
    /// Creates an invalid policy error.
    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy(message.into())
    }
}
