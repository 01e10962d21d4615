//! Error types for cart synchronization.

use quotecart_core::CartError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote rejected the payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The remote cannot be reached at all.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// A network call exceeded the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// A prompt-user conflict is waiting for a decision.
    #[error("conflict awaiting resolution")]
    ConflictUnresolved,

    /// A resolution was supplied but no conflict is pending.
    #[error("no pending conflict")]
    NoPendingConflict,

    /// The local cache could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The session was destroyed.
    #[error("session closed")]
    SessionClosed,

    /// Local cart error.
    #[error("cart error: {0}")]
    Cart(#[from] CartError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Returns true if this error can be retried.
    ///
    /// Validation failures are retried as well: the remote may reject a
    /// payload while its own copy is being rewritten.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Validation(_) | SyncError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true if this error means the remote is unreachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SyncError::Unreachable(_))
    }
}
