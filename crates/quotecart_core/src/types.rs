//! Core type definitions for QuoteCart.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a cart line.
///
/// Item IDs are random UUIDs that are:
/// - Unique within a cart
/// - Immutable once assigned
/// - Never reused for a different line
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Creates a new random item ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an item ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates an item ID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ItemId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

/// Identifier of the priced entity a cart line wraps.
///
/// Quote IDs are assigned by the quoting backend and are opaque to the cart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(String);

impl QuoteId {
    /// Creates a quote ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QuoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for QuoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of the session that owns a cart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Synchronization status of a cart with respect to the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Local and remote agree as of the last sync.
    Synced,
    /// A pull/push cycle is in progress.
    Syncing,
    /// Local and remote diverged and no resolution has been committed.
    Conflict,
    /// The remote is unreachable; pushes are suspended.
    Offline,
    /// The last sync failed after exhausting retries.
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Offline => "offline",
            SyncStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Strategy used to reconcile a diverged local and remote cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Remote replaces local.
    ServerWins,
    /// Local is pushed over remote.
    ClientWins,
    /// Item-level reconciliation, newest update wins.
    Merge,
    /// Defer to an external decision.
    PromptUser,
}

impl ConflictStrategy {
    /// Returns true if this strategy resolves conflicts without outside input.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictStrategy::PromptUser)
    }

    /// Parses a strategy from its kebab-case name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "server-wins" => Some(ConflictStrategy::ServerWins),
            "client-wins" => Some(ConflictStrategy::ClientWins),
            "merge" => Some(ConflictStrategy::Merge),
            "prompt-user" => Some(ConflictStrategy::PromptUser),
            _ => None,
        }
    }

    /// Returns the kebab-case name.
    pub fn name(&self) -> &'static str {
        match self {
            ConflictStrategy::ServerWins => "server-wins",
            ConflictStrategy::ClientWins => "client-wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::PromptUser => "prompt-user",
        }
    }
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::Merge
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_unique() {
        let a = ItemId::new();
        let b = ItemId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn item_id_display_matches_uuid() {
        let uuid = Uuid::from_bytes([7u8; 16]);
        let id = ItemId::from_uuid(uuid);
        assert_eq!(id.to_string(), uuid.to_string());
        assert_eq!(ItemId::from_bytes([7u8; 16]), id);
    }

    #[test]
    fn strategy_names() {
        for strategy in [
            ConflictStrategy::ServerWins,
            ConflictStrategy::ClientWins,
            ConflictStrategy::Merge,
            ConflictStrategy::PromptUser,
        ] {
            assert_eq!(ConflictStrategy::from_name(strategy.name()), Some(strategy));
        }
        assert_eq!(ConflictStrategy::from_name("last-write-wins"), None);
        assert!(!ConflictStrategy::PromptUser.auto_resolves());
    }
}
