//! # QuoteCart Core
//!
//! Client-side cart state engine for QuoteCart.
//!
//! This crate provides:
//! - The cart data model (items wrapping quotes, derived metadata)
//! - `CartStore`, the single-writer owner of a session's cart
//! - Business rules evaluated after every mutation
//! - Before/after middleware around every mutation
//! - Bounded undo/redo history
//! - An event feed and the analytics derived from it
//! - A versioned CBOR encoding for persistence
//!
//! ## Mutation pipeline
//!
//! ```text
//! intent ─► before hooks ─► apply ─► rule pass ─► history ─► commit
//!                │                                             │
//!                └─ veto: no change, no events                 ▼
//!                                                events ─► after hooks
//! ```
//!
//! ## Key Invariants
//!
//! - Metadata always matches items in any committed state
//! - At most one quote per cart line
//! - Readers never block on writers for longer than a pointer swap
//! - History never holds more than `max_history_size` snapshots
//!
//! Synchronization with a remote authority lives in `quotecart_sync`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod analytics;
mod codec;
mod config;
mod error;
mod event;
mod history;
mod item;
mod middleware;
mod rules;
mod state;
mod store;
mod types;

pub use analytics::{conversion_potential, AnalyticsAggregator, CartAnalytics, SyncPerformance};
pub use codec::{decode_state, encode_state, FORMAT_VERSION};
pub use config::CartConfig;
pub use error::{CartError, CartResult};
pub use event::{CartEvent, EventFeed, EventKind, EventPayload, EventSource};
pub use history::{CartSnapshot, HistoryManager};
pub use item::{CartItem, ItemMetadata, Quote};
pub use middleware::{CartMiddleware, HookError, MiddlewarePipeline, MutationOutcome};
pub use rules::{AppliedRule, BoxFuture, CartRule, RuleEngine, RuleError, RuleFailure, RulePass};
pub use state::{items_digest, CartMetadata, CartPatch, CartState, SyncBaseline};
pub use store::CartStore;
pub use types::{ConflictStrategy, ItemId, QuoteId, SessionId, SyncStatus};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
