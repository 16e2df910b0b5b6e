//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Failure reported by a platform API for a single channel.
///
/// Raised by create/update/remove/end-signal calls. The scheduler and the
/// event reconciler log these and carry on with the next channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct OutputError {
    /// Human-readable reason from the remote side
    pub message: String,
    /// Whether repeating the same call may succeed
    pub retryable: bool,
}

impl OutputError {
    /// Creates a non-retryable output error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an output error that may succeed on retry.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Errors that can occur in broadcast scheduling operations.
#[derive(Error, Debug, Clone)]
pub enum LiveBroadcastError {
    /// The scheduler cannot run at all (e.g. no runtime environment).
    #[error("Scheduler cannot run: {reason}")]
    ScheduleFatal { reason: String },

    /// A remote API call for a single channel failed.
    #[error("Output failed: {0}")]
    Output(#[from] OutputError),

    /// A lookup that must yield exactly one result yielded none.
    #[error("No {kind} found for external id: {id}")]
    InvalidExternalReference { kind: String, id: String },

    /// Saving state to the persistence collaborator failed.
    #[error("Couldn't save broadcast state: {0}")]
    Persistence(String),
}

impl LiveBroadcastError {
    /// Creates a fatal scheduling error.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::ScheduleFatal {
            reason: reason.into(),
        }
    }

    /// Returns true if this error must abort the whole tick.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ScheduleFatal { .. })
    }
}

/// Result type for broadcast operations.
pub type BroadcastResult<T> = Result<T, LiveBroadcastError>;
