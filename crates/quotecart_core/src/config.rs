//! Cart configuration.

use crate::types::ConflictStrategy;

/// Configuration for a cart store.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Maximum number of snapshots kept for undo/redo (at least 1).
    pub max_history_size: usize,

    /// Currency of quote totals.
    pub base_currency: String,

    /// Currency the host displays prices in.
    pub display_currency: String,

    /// Conflict strategy recorded in the cart metadata.
    pub conflict_strategy: ConflictStrategy,

    /// Number of events the event feed keeps for polling.
    pub event_history_limit: usize,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            max_history_size: 50,
            base_currency: "USD".into(),
            display_currency: "USD".into(),
            conflict_strategy: ConflictStrategy::Merge,
            event_history_limit: 1000,
        }
    }
}

impl CartConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the history capacity. Values below 1 are raised to 1.
    #[must_use]
    pub fn max_history_size(mut self, size: usize) -> Self {
        self.max_history_size = size.max(1);
        self
    }

    /// Sets the base currency.
    #[must_use]
    pub fn base_currency(mut self, currency: impl Into<String>) -> Self {
        self.base_currency = currency.into();
        self
    }

    /// Sets the display currency.
    #[must_use]
    pub fn display_currency(mut self, currency: impl Into<String>) -> Self {
        self.display_currency = currency.into();
        self
    }

    /// Sets the conflict strategy.
    #[must_use]
    pub const fn conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    /// Sets how many events the feed retains for polling.
    #[must_use]
    pub const fn event_history_limit(mut self, limit: usize) -> Self {
        self.event_history_limit = limit;
        self
    }
}
