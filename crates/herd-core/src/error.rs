//! Error types for the Herd driver.
//!
//! [`VecError`] is the taxonomy surfaced by every controller operation;
//! [`InstanceError`] is what a single simulation reports when one of its
//! own operations fails.

use std::error::Error;
use std::fmt;

/// Failure reported by a single simulation instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstanceError {
    /// The instance returned an error from `init` or `step`.
    Failed {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// The instance panicked; the panic was caught on the worker thread.
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl InstanceError {
    /// Shorthand for [`InstanceError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "instance failed: {reason}"),
            Self::Panicked { message } => write!(f, "instance panicked: {message}"),
        }
    }
}

impl Error for InstanceError {}

/// Errors from controller operations.
///
/// Argument and state errors are detected before any instance or queue
/// state is touched, so a call that returns one of them has no effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VecError {
    /// Buffer, action or index count does not match the instance count.
    InvalidArgument {
        /// What was wrong with the arguments.
        reason: String,
    },
    /// The operation is illegal in the current round state (e.g. a
    /// second `step_async` before `step_wait`, or `render` mid-round).
    InvalidState {
        /// Which state precondition was violated.
        reason: String,
    },
    /// No variant with this name is registered.
    NotFound {
        /// The requested variant name.
        variant: String,
    },
    /// An instance failed irrecoverably. The controller is poisoned and
    /// returns this error from every later operation.
    Fatal {
        /// Slot index of the failing instance.
        index: usize,
        /// The underlying instance failure.
        error: InstanceError,
    },
}

impl VecError {
    /// Shorthand for [`VecError::InvalidArgument`].
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`VecError::InvalidState`].
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Whether this error poisons the controller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

impl fmt::Display for VecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Self::InvalidState { reason } => write!(f, "invalid state: {reason}"),
            Self::NotFound { variant } => write!(f, "unknown variant '{variant}'"),
            Self::Fatal { index, error } => write!(f, "instance {index}: {error}"),
        }
    }
}

impl Error for VecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fatal { error, .. } => Some(error),
            _ => None,
        }
    }
}
