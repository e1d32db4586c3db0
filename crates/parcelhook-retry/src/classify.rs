//! Partitions callback failures into retryable and non-retryable.

use std::fmt;

use parcelhook_core::FlowError;

/// How a callback failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Rejected callback. Surfaced immediately, never enqueued.
    Permanent,
    /// Downstream hiccup. Enqueued and replayed later.
    Transient,
    /// The shipment does not exist. Rejected at ingress, dead-lettered at
    /// replay.
    NotFound,
}

impl FailureClass {
    /// Returns true if the failure goes to the retry queue.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => write!(f, "permanent"),
            Self::Transient => write!(f, "transient"),
            Self::NotFound => write!(f, "not_found"),
        }
    }
}

/// Classifies a failure raised by the callback flow.
pub const fn classify(error: &FlowError) -> FailureClass {
    match error {
        FlowError::InvalidCallback(_)
        | FlowError::InvalidTransition { .. }
        | FlowError::UnknownProvider(_)
        | FlowError::Unsupported { .. } => FailureClass::Permanent,
        FlowError::ShipmentNotFound(_) => FailureClass::NotFound,
        FlowError::Communication(_) | FlowError::Repository(_) => FailureClass::Transient,
    }
}
