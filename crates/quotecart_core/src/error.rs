//! Error types for QuoteCart core.

use crate::types::{ItemId, QuoteId};
use thiserror::Error;

/// Result type for core operations.
pub type CartResult<T> = Result<T, CartError>;

/// Errors that can occur in cart operations.
///
/// All of these are local and recoverable: the caller may retry with
/// different input or ignore them. The committed cart is never left in a
/// partially-applied state.
#[derive(Debug, Error)]
pub enum CartError {
    /// An item for the same quote is already in the cart.
    #[error("quote {quote_id} is already in the cart")]
    DuplicateItem {
        /// The duplicated quote.
        quote_id: QuoteId,
    },

    /// No item with the given ID exists.
    #[error("item not found: {item_id}")]
    NotFound {
        /// The missing item.
        item_id: ItemId,
    },

    /// A middleware `before` hook vetoed the mutation.
    #[error("mutation rejected by middleware {middleware}: {reason}")]
    MiddlewareRejected {
        /// Name of the rejecting middleware.
        middleware: String,
        /// Reason given by the middleware.
        reason: String,
    },

    /// Undo was requested at the oldest retained snapshot.
    #[error("nothing to undo")]
    NothingToUndo,

    /// Redo was requested at the newest snapshot.
    #[error("nothing to redo")]
    NothingToRedo,

    /// A rule patch could not be applied to the cart.
    #[error("invalid patch: {message}")]
    InvalidPatch {
        /// Description of the problem.
        message: String,
    },

    /// Encoding or decoding a persisted cart failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// A persisted cart uses a format this build cannot read.
    #[error("unsupported cart format version {found} (supported: {supported})")]
    UnsupportedFormat {
        /// Version found in the encoded data.
        found: u16,
        /// Version written by this build.
        supported: u16,
    },
}

impl CartError {
    /// Creates a middleware rejection error.
    pub fn rejected(middleware: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MiddlewareRejected {
            middleware: middleware.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid patch error.
    pub fn invalid_patch(message: impl Into<String>) -> Self {
        Self::InvalidPatch {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}
