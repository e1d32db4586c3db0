//! Error types and result handling for callback processing.
//!
//! Three layers of errors flow through the system:
//!
//! - [`CoreError`] for storage-layer failures inside repositories.
//! - [`FlowError`] for failures raised by the shipment flow collaborator while
//!   verifying or applying a callback.
//! - [`CallbackError`] for the result surfaced to whoever delivered the
//!   callback, with a coarse [`ErrorKind`] that maps onto HTTP statuses.

use std::fmt;

use thiserror::Error;

use crate::models::{RetryId, ShipmentId, ShipmentStatus};

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Failure raised by the shipment flow while handling a callback.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// Signature, token or payload rejected by the provider.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    /// The callback asks for a status change the shipment cannot make.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current shipment status
        from: ShipmentStatus,
        /// Requested shipment status
        to: ShipmentStatus,
    },

    /// No provider is registered under the slug.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The provider does not support the requested operation.
    #[error("provider {provider} does not support {capability}")]
    Unsupported {
        /// Provider slug
        provider: String,
        /// Operation that was requested
        capability: String,
    },

    /// The shipment vanished while the callback was being applied.
    #[error("shipment {0} not found")]
    ShipmentNotFound(ShipmentId),

    /// A downstream dependency could not be reached.
    #[error("communication error: {0}")]
    Communication(String),

    /// The shipment repository failed.
    #[error("shipment repository error: {0}")]
    Repository(#[from] CoreError),
}

impl FlowError {
    /// Creates an invalid callback error.
    pub fn invalid_callback(message: impl Into<String>) -> Self {
        Self::InvalidCallback(message.into())
    }

    /// Creates a communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication(message.into())
    }
}

/// Coarse classification of a callback failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Shipment or record absent.
    NotFound,
    /// Permanent rejection. Never retried.
    Validation,
    /// Transient upstream failure. Retried through the queue.
    Communication,
    /// Retry store failure. Fatal for the request.
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Validation => write!(f, "validation"),
            Self::Communication => write!(f, "communication"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

/// Result of handling one inbound callback, as reported to the sender.
#[derive(Debug, Clone, Error)]
pub enum CallbackError {
    /// The shipment referenced by the callback does not exist.
    #[error("Shipment {0} not found")]
    ShipmentNotFound(ShipmentId),

    /// The callback arrived on a provider route the shipment does not use.
    #[error("Provider slug mismatch: shipment uses {expected}, callback came from {actual}")]
    ProviderMismatch {
        /// Provider recorded on the shipment
        expected: String,
        /// Provider the callback was addressed to
        actual: String,
    },

    /// The callback was rejected and will not be retried.
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// The callback requested an impossible status change.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current shipment status
        from: ShipmentStatus,
        /// Requested shipment status
        to: ShipmentStatus,
    },

    /// Handling failed transiently. `retry_id` is set when a retry record was
    /// enqueued.
    #[error("Callback handling failed: {reason}")]
    Communication {
        /// Failure description
        reason: String,
        /// Retry record created for the callback
        retry_id: Option<RetryId>,
    },

    /// The retry store could not persist the callback.
    #[error("Retry storage failed: {0}")]
    Storage(#[from] CoreError),
}

impl CallbackError {
    /// Returns the coarse kind used for status mapping.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ShipmentNotFound(_) => ErrorKind::NotFound,
            Self::ProviderMismatch { .. }
            | Self::InvalidCallback(_)
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::Communication { .. } => ErrorKind::Communication,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Returns a stable machine-readable error code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ShipmentNotFound(_) => "not_found",
            Self::ProviderMismatch { .. } => "provider_mismatch",
            Self::InvalidCallback(_) => "invalid_callback",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Communication { .. } => "communication_error",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Returns whether the sender may usefully try again.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Communication | ErrorKind::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_errors_map_to_kinds() {
        assert_eq!(CallbackError::ShipmentNotFound("s-1".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            CallbackError::ProviderMismatch { expected: "a".into(), actual: "b".into() }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(CallbackError::InvalidCallback("bad token".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            CallbackError::Communication { reason: "timeout".into(), retry_id: None }.kind(),
            ErrorKind::Communication
        );
        assert_eq!(
            CallbackError::Storage(CoreError::Database("down".into())).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(!CallbackError::InvalidCallback("bad token".into()).is_retryable());
        assert!(!CallbackError::ShipmentNotFound("s-1".into()).is_retryable());
        assert!(CallbackError::Communication { reason: "x".into(), retry_id: None }.is_retryable());
    }

    #[test]
    fn error_display_format() {
        let error = CallbackError::ProviderMismatch { expected: "inpost".into(), actual: "dpd".into() };
        assert_eq!(
            error.to_string(),
            "Provider slug mismatch: shipment uses inpost, callback came from dpd"
        );

        let error = FlowError::InvalidTransition {
            from: ShipmentStatus::New,
            to: ShipmentStatus::Delivered,
        };
        assert_eq!(error.to_string(), "invalid transition from new to delivered");
    }
}
