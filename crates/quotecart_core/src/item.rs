//! Cart lines and the quotes they wrap.

use crate::types::{ItemId, QuoteId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A priced entity that can be placed in the cart.
///
/// Pricing is computed elsewhere; the cart only carries the total it was
/// given, expressed in the cart's base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Quote identifier assigned by the quoting backend.
    pub id: QuoteId,
    /// Human-readable reference (quote number, product name).
    pub reference: String,
    /// Quote total in the base currency.
    pub total: Decimal,
}

impl Quote {
    /// Creates a quote.
    pub fn new(id: impl Into<QuoteId>, reference: impl Into<String>, total: Decimal) -> Self {
        Self {
            id: id.into(),
            reference: reference.into(),
            total,
        }
    }
}

/// Optional facts recorded when a line was added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Surface the item was added from (product page, quote list, ...).
    pub origin: Option<String>,
    /// Price shown to the user at the time of add, in `recorded_currency`.
    pub recorded_price: Option<Decimal>,
    /// Display currency of `recorded_price`.
    pub recorded_currency: Option<String>,
}

impl ItemMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the origin surface.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Sets the recorded display price and currency.
    #[must_use]
    pub fn with_recorded_price(mut self, price: Decimal, currency: impl Into<String>) -> Self {
        self.recorded_price = Some(price);
        self.recorded_currency = Some(currency.into());
        self
    }
}

/// One line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Line identifier, unique within the cart.
    pub id: ItemId,
    /// The wrapped quote.
    pub quote: Quote,
    /// When the line was added.
    pub added_at: DateTime<Utc>,
    /// When the line was last changed. Never earlier than `added_at`.
    pub last_updated: DateTime<Utc>,
    /// Optional metadata recorded at add time.
    pub metadata: Option<ItemMetadata>,
}

impl CartItem {
    /// Creates a new line stamped at `now`.
    pub fn new(quote: Quote, metadata: Option<ItemMetadata>, now: DateTime<Utc>) -> Self {
        Self {
            id: ItemId::new(),
            quote,
            added_at: now,
            last_updated: now,
            metadata,
        }
    }

    /// Returns the quote this line wraps.
    pub fn quote_id(&self) -> &QuoteId {
        &self.quote.id
    }

    /// Returns the value shown to the user: the recorded price when one was
    /// captured, otherwise the base total.
    pub fn display_value(&self) -> Decimal {
        self.metadata
            .as_ref()
            .and_then(|m| m.recorded_price)
            .unwrap_or(self.quote.total)
    }

    /// Returns true if both lines carry the same quote and metadata.
    ///
    /// Timestamps and line IDs are ignored.
    pub fn same_content(&self, other: &CartItem) -> bool {
        self.quote == other.quote && self.metadata == other.metadata
    }

    /// Bumps `last_updated`, keeping it no earlier than `added_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now.max(self.added_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn quote() -> Quote {
        Quote::new("Q-1", "Widget", Decimal::new(1999, 2))
    }

    #[test]
    fn new_item_timestamps() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let item = CartItem::new(quote(), None, now);
        assert_eq!(item.added_at, now);
        assert_eq!(item.last_updated, now);
        assert_eq!(item.quote_id().as_str(), "Q-1");
    }

    #[test]
    fn display_value_prefers_recorded_price() {
        let now = Utc::now();
        let plain = CartItem::new(quote(), None, now);
        assert_eq!(plain.display_value(), Decimal::new(1999, 2));

        let meta = ItemMetadata::new().with_recorded_price(Decimal::new(1850, 2), "EUR");
        let priced = CartItem::new(quote(), Some(meta), now);
        assert_eq!(priced.display_value(), Decimal::new(1850, 2));
    }

    #[test]
    fn touch_never_precedes_added_at() {
        let added = Utc.timestamp_opt(100, 0).unwrap();
        let mut item = CartItem::new(quote(), None, added);
        item.touch(Utc.timestamp_opt(50, 0).unwrap());
        assert_eq!(item.last_updated, added);
        item.touch(Utc.timestamp_opt(150, 0).unwrap());
        assert_eq!(item.last_updated, Utc.timestamp_opt(150, 0).unwrap());
    }

    #[test]
    fn same_content_ignores_ids_and_time() {
        let a = CartItem::new(quote(), None, Utc.timestamp_opt(1, 0).unwrap());
        let b = CartItem::new(quote(), None, Utc.timestamp_opt(2, 0).unwrap());
        assert!(a.same_content(&b));

        let c = CartItem::new(quote(), Some(ItemMetadata::new().with_origin("pdp")), a.added_at);
        assert!(!a.same_content(&c));
    }
}
