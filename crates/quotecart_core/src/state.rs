//! The cart aggregate and its derived metadata.

use crate::config::CartConfig;
use crate::error::{CartError, CartResult};
use crate::history::{CartSnapshot, HistoryManager};
use crate::item::{CartItem, ItemMetadata, Quote};
use crate::types::{ConflictStrategy, ItemId, QuoteId, SyncStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Aggregate facts about the cart.
///
/// Item-derived fields are recomputed from `CartState::items` on every
/// change. `last_synced_at` and `conflict_strategy` describe the session and
/// are carried across recomputes; the estimates are only set by rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartMetadata {
    /// Number of lines in the cart.
    pub total_items: usize,
    /// Sum of quote totals in the base currency.
    pub total_value: Decimal,
    /// Sum of display values (recorded prices, falling back to totals).
    pub total_display_value: Decimal,
    /// Currency of `total_value`.
    pub base_currency: String,
    /// Currency of `total_display_value`.
    pub display_currency: String,
    /// Time of the last successful sync with the remote authority.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Shipping estimate supplied by a rule.
    pub shipping_estimate: Option<Decimal>,
    /// Tax estimate supplied by a rule.
    pub tax_estimate: Option<Decimal>,
    /// Strategy applied when local and remote diverge.
    pub conflict_strategy: ConflictStrategy,
}

impl Default for CartMetadata {
    fn default() -> Self {
        Self {
            total_items: 0,
            total_value: Decimal::ZERO,
            total_display_value: Decimal::ZERO,
            base_currency: "USD".into(),
            display_currency: "USD".into(),
            last_synced_at: None,
            shipping_estimate: None,
            tax_estimate: None,
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

impl CartMetadata {
    /// Creates empty metadata for the given configuration.
    pub fn for_config(config: &CartConfig) -> Self {
        Self {
            base_currency: config.base_currency.clone(),
            display_currency: config.display_currency.clone(),
            conflict_strategy: config.conflict_strategy,
            ..Self::default()
        }
    }

    /// Derives metadata for `items`, carrying session fields from `self`.
    pub fn recompute(&self, items: &[CartItem]) -> Self {
        Self {
            total_items: items.len(),
            total_value: items.iter().map(|i| i.quote.total).sum(),
            total_display_value: items.iter().map(CartItem::display_value).sum(),
            ..self.clone()
        }
    }
}

/// A partial state change produced by a rule action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartPatch {
    /// Quotes to add as new lines.
    pub add: Vec<(Quote, Option<ItemMetadata>)>,
    /// Quotes whose lines should be removed.
    pub remove: Vec<QuoteId>,
    /// New shipping estimate.
    pub shipping_estimate: Option<Decimal>,
    /// New tax estimate.
    pub tax_estimate: Option<Decimal>,
}

impl CartPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a quote.
    #[must_use]
    pub fn add_quote(mut self, quote: Quote, metadata: Option<ItemMetadata>) -> Self {
        self.add.push((quote, metadata));
        self
    }

    /// Removes the line wrapping a quote.
    #[must_use]
    pub fn remove_quote(mut self, quote_id: impl Into<QuoteId>) -> Self {
        self.remove.push(quote_id.into());
        self
    }

    /// Sets the shipping estimate.
    #[must_use]
    pub fn shipping(mut self, estimate: Decimal) -> Self {
        self.shipping_estimate = Some(estimate);
        self
    }

    /// Sets the tax estimate.
    #[must_use]
    pub fn tax(mut self, estimate: Decimal) -> Self {
        self.tax_estimate = Some(estimate);
        self
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.remove.is_empty()
            && self.shipping_estimate.is_none()
            && self.tax_estimate.is_none()
    }
}

/// Content and remote version the cart and its remote copy last agreed on.
///
/// Carried with the cart so that a session restored from a cache can tell
/// local edits apart from content that was already in sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBaseline {
    /// Lines both sides held.
    pub items: Vec<CartItem>,
    /// Remote version of those lines.
    pub version: u64,
}

impl SyncBaseline {
    /// Creates a baseline.
    pub fn new(items: Vec<CartItem>, version: u64) -> Self {
        Self { items, version }
    }
}

/// The root cart aggregate.
///
/// A `CartState` is only changed through [`crate::CartStore`]; readers get
/// immutable `Arc<CartState>` snapshots in which `metadata` always matches
/// `items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartState {
    /// Lines in display (insertion) order.
    pub items: Vec<CartItem>,
    /// Aggregate facts derived from `items`.
    pub metadata: CartMetadata,
    /// Sync status with respect to the remote authority.
    pub sync_status: SyncStatus,
    /// Undo/redo log.
    pub history: HistoryManager,
    /// Capacity of `history`.
    pub max_history_size: usize,
    /// Last agreed content, once the cart has synced.
    #[serde(default)]
    pub sync_baseline: Option<SyncBaseline>,
}

impl CartState {
    /// Creates an empty cart.
    pub fn new(config: &CartConfig, now: DateTime<Utc>) -> Self {
        let metadata = CartMetadata::for_config(config);
        Self {
            items: Vec::new(),
            history: HistoryManager::new(
                config.max_history_size,
                Vec::new(),
                metadata.clone(),
                now,
            ),
            metadata,
            sync_status: SyncStatus::Synced,
            max_history_size: config.max_history_size.max(1),
            sync_baseline: None,
        }
    }

    /// Creates a cart holding `items`, as when hydrating from a remote copy.
    ///
    /// Duplicate quotes are dropped, keeping the first occurrence.
    pub fn with_items(config: &CartConfig, items: Vec<CartItem>, now: DateTime<Utc>) -> Self {
        let mut state = Self::new(config, now);
        state.replace_items(items);
        state.history = HistoryManager::new(
            state.max_history_size,
            state.items.clone(),
            state.metadata.clone(),
            now,
        );
        state
    }

    /// Returns the line with the given ID.
    pub fn get_item(&self, item_id: ItemId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Returns true if a line with the given ID exists.
    pub fn has_item(&self, item_id: ItemId) -> bool {
        self.get_item(item_id).is_some()
    }

    /// Returns the line wrapping a quote.
    pub fn find_by_quote(&self, quote_id: &QuoteId) -> Option<&CartItem> {
        self.items.iter().find(|i| &i.quote.id == quote_id)
    }

    /// Returns true if the quote is in the cart.
    pub fn contains_quote(&self, quote_id: &QuoteId) -> bool {
        self.find_by_quote(quote_id).is_some()
    }

    /// Returns the number of lines.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the base-currency total.
    pub fn total_value(&self) -> Decimal {
        self.metadata.total_value
    }

    /// Returns true if `metadata` matches `items`.
    pub fn is_consistent(&self) -> bool {
        self.metadata.recompute(&self.items) == self.metadata
    }

    /// Returns a SHA-256 digest of the item contents.
    ///
    /// Two carts with the same lines in the same order have the same digest,
    /// regardless of metadata, history or sync status.
    pub fn content_digest(&self) -> [u8; 32] {
        items_digest(&self.items)
    }

    pub(crate) fn push_item(&mut self, item: CartItem) -> CartResult<()> {
        if self.contains_quote(&item.quote.id) {
            return Err(CartError::DuplicateItem {
                quote_id: item.quote.id,
            });
        }
        self.items.push(item);
        self.recompute_metadata();
        Ok(())
    }

    pub(crate) fn remove_item(&mut self, item_id: ItemId) -> CartResult<CartItem> {
        let index = self
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(CartError::NotFound { item_id })?;
        let removed = self.items.remove(index);
        self.recompute_metadata();
        Ok(removed)
    }

    pub(crate) fn clear_items(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        self.recompute_metadata();
        removed
    }

    pub(crate) fn replace_items(&mut self, items: Vec<CartItem>) {
        let mut deduped: Vec<CartItem> = Vec::with_capacity(items.len());
        for item in items {
            if !deduped.iter().any(|i| i.quote.id == item.quote.id) {
                deduped.push(item);
            }
        }
        self.items = deduped;
        self.recompute_metadata();
    }

    pub(crate) fn recompute_metadata(&mut self) {
        self.metadata = self.metadata.recompute(&self.items);
    }

    /// Applies a rule patch. Either the whole patch applies or nothing does.
    pub(crate) fn apply_patch(&mut self, patch: &CartPatch, now: DateTime<Utc>) -> CartResult<()> {
        let mut next = self.items.clone();

        for quote_id in &patch.remove {
            let index = next
                .iter()
                .position(|i| &i.quote.id == quote_id)
                .ok_or_else(|| {
                    CartError::invalid_patch(format!("quote {quote_id} is not in the cart"))
                })?;
            next.remove(index);
        }

        for (quote, metadata) in &patch.add {
            if next.iter().any(|i| i.quote.id == quote.id) {
                return Err(CartError::invalid_patch(format!(
                    "quote {} is already in the cart",
                    quote.id
                )));
            }
            next.push(CartItem::new(quote.clone(), metadata.clone(), now));
        }

        self.items = next;
        if let Some(shipping) = patch.shipping_estimate {
            self.metadata.shipping_estimate = Some(shipping);
        }
        if let Some(tax) = patch.tax_estimate {
            self.metadata.tax_estimate = Some(tax);
        }
        self.recompute_metadata();
        Ok(())
    }

    /// Applies `capacity` to the history and re-seeds it with the current
    /// contents if the snapshot at its cursor does not match them.
    pub(crate) fn clamp_history(&mut self, capacity: usize, now: DateTime<Utc>) {
        self.max_history_size = capacity.max(1);
        self.history.set_capacity(self.max_history_size);
        let matches = self
            .history
            .current()
            .is_some_and(|snapshot| snapshot.items == self.items);
        if !matches {
            self.history = HistoryManager::new(
                self.max_history_size,
                self.items.clone(),
                self.metadata.clone(),
                now,
            );
        }
    }

    /// Appends the current contents to the history log.
    pub(crate) fn record_history(&mut self, action: &str, now: DateTime<Utc>) -> u64 {
        self.history
            .record(self.items.clone(), self.metadata.clone(), action, now)
    }

    /// Restores contents from a snapshot, keeping session metadata.
    pub(crate) fn restore(&mut self, snapshot: &CartSnapshot) {
        let last_synced_at = self.metadata.last_synced_at;
        let conflict_strategy = self.metadata.conflict_strategy;
        self.items = snapshot.items.clone();
        self.metadata = snapshot.metadata.clone();
        self.metadata.last_synced_at = last_synced_at;
        self.metadata.conflict_strategy = conflict_strategy;
    }
}

/// Returns a SHA-256 digest over the contents of `items`.
pub fn items_digest(items: &[CartItem]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((items.len() as u64).to_le_bytes());
    for item in items {
        hasher.update(item.id.as_uuid().as_bytes());
        update_str(&mut hasher, item.quote.id.as_str());
        update_str(&mut hasher, &item.quote.reference);
        update_str(&mut hasher, &item.quote.total.normalize().to_string());
        hasher.update(item.added_at.timestamp_micros().to_le_bytes());
        hasher.update(item.last_updated.timestamp_micros().to_le_bytes());
        match &item.metadata {
            None => hasher.update([0u8]),
            Some(meta) => {
                hasher.update([1u8]);
                update_opt_str(&mut hasher, meta.origin.as_deref());
                let price = meta.recorded_price.map(|p| p.normalize().to_string());
                update_opt_str(&mut hasher, price.as_deref());
                update_opt_str(&mut hasher, meta.recorded_currency.as_deref());
            }
        }
    }
    hasher.finalize().into()
}

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn update_opt_str(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        None => hasher.update([0u8]),
        Some(v) => {
            hasher.update([1u8]);
            update_str(hasher, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(id: &str, cents: i64) -> Quote {
        Quote::new(id, "test", Decimal::new(cents, 2))
    }

    #[test]
    fn new_cart_is_empty_and_consistent() {
        let state = CartState::new(&CartConfig::default(), Utc::now());
        assert!(state.is_empty());
        assert!(state.is_consistent());
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn push_and_remove_recompute_metadata() {
        let mut state = CartState::new(&CartConfig::default(), Utc::now());
        let a = CartItem::new(quote("A", 1000), None, Utc::now());
        let b = CartItem::new(quote("B", 250), None, Utc::now());
        let a_id = a.id;

        state.push_item(a).unwrap();
        state.push_item(b).unwrap();
        assert_eq!(state.metadata.total_items, 2);
        assert_eq!(state.metadata.total_value, Decimal::new(1250, 2));

        state.remove_item(a_id).unwrap();
        assert_eq!(state.metadata.total_items, 1);
        assert_eq!(state.metadata.total_value, Decimal::new(250, 2));
        assert!(state.is_consistent());
    }

    #[test]
    fn push_rejects_duplicate_quote() {
        let mut state = CartState::new(&CartConfig::default(), Utc::now());
        state
            .push_item(CartItem::new(quote("A", 100), None, Utc::now()))
            .unwrap();
        let err = state
            .push_item(CartItem::new(quote("A", 100), None, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, CartError::DuplicateItem { .. }));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut state = CartState::new(&CartConfig::default(), Utc::now());
        state
            .push_item(CartItem::new(quote("A", 100), None, Utc::now()))
            .unwrap();

        let bad = CartPatch::new()
            .add_quote(quote("B", 100), None)
            .remove_quote("missing");
        assert!(state.apply_patch(&bad, Utc::now()).is_err());
        assert_eq!(state.len(), 1);

        let good = CartPatch::new()
            .add_quote(quote("B", 100), None)
            .shipping(Decimal::new(500, 2));
        state.apply_patch(&good, Utc::now()).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.metadata.shipping_estimate, Some(Decimal::new(500, 2)));
        assert!(state.is_consistent());
    }

    #[test]
    fn digest_tracks_item_content() {
        let now = Utc::now();
        let item = CartItem::new(quote("A", 100), None, now);
        let mut a = CartState::new(&CartConfig::default(), now);
        let mut b = CartState::new(&CartConfig::default(), now);
        assert_eq!(a.content_digest(), b.content_digest());

        a.push_item(item.clone()).unwrap();
        assert_ne!(a.content_digest(), b.content_digest());

        b.push_item(item).unwrap();
        b.sync_status = SyncStatus::Error;
        assert_eq!(a.content_digest(), b.content_digest());
    }

    #[test]
    fn with_items_drops_duplicate_quotes() {
        let now = Utc::now();
        let items = vec![
            CartItem::new(quote("A", 100), None, now),
            CartItem::new(quote("A", 200), None, now),
            CartItem::new(quote("B", 300), None, now),
        ];
        let state = CartState::with_items(&CartConfig::default(), items, now);
        assert_eq!(state.len(), 2);
        assert_eq!(state.total_value(), Decimal::new(400, 2));
        assert_eq!(state.history.current().unwrap().items.len(), 2);
    }
}
