//! # QuoteCart Sync
//!
//! Keeps a local QuoteCart store consistent with a remote authority.
//!
//! This crate provides:
//! - Sync state machine (synced → syncing → synced / conflict / offline / error)
//! - Debounced pushes of local changes and periodic pulls
//! - Conflict detection against a sync baseline and strategy-based resolution
//! - Retry with exponential backoff
//! - Remote-authority abstraction with an in-memory implementation
//! - Local cart cache (memory or file)
//! - `CartSession`, the host-facing API
//!
//! ## Architecture
//!
//! Sync follows a **pull-then-push** model:
//! 1. Pull the remote copy
//! 2. Decide against the baseline: nothing, push, fast-forward or resolve
//! 3. Push when the local result differs from the remote copy
//!
//! ## Key Invariants
//!
//! - Only the coordinator talks to the remote
//! - One sync cycle runs at a time
//! - Remote content is committed against the exact state it replaces
//! - Conflict resolution is pure and idempotent
//! - Results of calls that outlive connectivity are discarded
//! - The remote, never the cache, is the source of truth for conflicts; the
//!   cache only carries the baseline last agreed with it

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod coordinator;
mod error;
mod persistence;
mod remote;
mod session;

pub use config::{PromptResolutionScope, RetryConfig, SyncConfig};
pub use conflict::{ConflictRecord, ConflictResolver, Resolution};
pub use coordinator::{SyncCoordinator, SyncOutcome, SyncStats};
pub use error::{SyncError, SyncResult};
pub use persistence::{CartPersistence, FilePersistence, MemoryPersistence};
pub use remote::{MemoryRemote, PushAck, RemoteCart, RemoteSnapshot};
pub use session::CartSession;
