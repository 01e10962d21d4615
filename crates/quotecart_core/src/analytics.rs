//! Usage and sync metrics derived from the event stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! let analytics = store.analytics();
//! println!("added: {}", analytics.items_added);
//! println!("conversion potential: {}", analytics.conversion_potential);
//! println!("sync success rate: {:.2}", analytics.sync.success_rate);
//! ```

use crate::event::{CartEvent, EventPayload};
use crate::state::CartState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of items at which the item-count component saturates.
const SCORE_ITEM_CAP: u64 = 10;
/// Points per item in the item-count component.
const SCORE_PER_ITEM: u64 = 5;
/// Maximum points from recency.
const SCORE_RECENCY_MAX: f64 = 50.0;
/// Inactivity after which the recency component reaches zero.
const SCORE_RECENCY_WINDOW_SECS: f64 = 3600.0;

/// Sync performance derived from paired sync events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPerformance {
    /// Mean duration of completed cycles in milliseconds.
    pub average_duration_ms: f64,
    /// Successful cycles divided by started cycles.
    pub success_rate: f64,
    /// Failed cycles divided by started cycles.
    pub error_rate: f64,
}

/// Point-in-time analytics for a cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartAnalytics {
    /// Lines added through `add_item`. Lines added by rule patches are
    /// counted under `rules_applied`.
    pub items_added: u64,
    /// Lines removed.
    pub items_removed: u64,
    /// Times the cart was cleared.
    pub carts_cleared: u64,
    /// Rule applications.
    pub rules_applied: u64,
    /// Sync cycles started.
    pub syncs_started: u64,
    /// Sync cycles that succeeded.
    pub syncs_succeeded: u64,
    /// Sync cycles that failed.
    pub syncs_failed: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Current number of lines.
    pub item_count: usize,
    /// Current base-currency total.
    pub total_value: Decimal,
    /// Current display total.
    pub total_display_value: Decimal,
    /// Heuristic 0–100 score of how likely the cart is to convert.
    pub conversion_potential: u8,
    /// Last user or rule activity on the cart contents.
    pub last_activity: Option<DateTime<Utc>>,
    /// Sync performance.
    pub sync: SyncPerformance,
}

#[derive(Debug, Default)]
struct Counters {
    items_added: u64,
    items_removed: u64,
    carts_cleared: u64,
    rules_applied: u64,
    syncs_started: u64,
    syncs_succeeded: u64,
    syncs_failed: u64,
    conflicts_detected: u64,
    last_activity: Option<DateTime<Utc>>,
    open_syncs: HashMap<u64, DateTime<Utc>>,
    paired_syncs: u64,
    total_sync_ms: u64,
}

/// Folds cart events into running counters.
#[derive(Debug, Default)]
pub struct AnalyticsAggregator {
    counters: Mutex<Counters>,
}

impl AnalyticsAggregator {
    /// Creates an aggregator with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one event.
    pub fn record(&self, event: &CartEvent) {
        let mut c = self.counters.lock();
        match &event.payload {
            EventPayload::ItemAdded { .. } => {
                c.items_added += 1;
                c.last_activity = Some(event.timestamp);
            }
            EventPayload::ItemRemoved { .. } => {
                c.items_removed += 1;
                c.last_activity = Some(event.timestamp);
            }
            EventPayload::CartCleared { .. } => {
                c.carts_cleared += 1;
                c.last_activity = Some(event.timestamp);
            }
            EventPayload::RuleApplied { .. } => {
                c.rules_applied += 1;
            }
            EventPayload::SyncStarted { sync_id } => {
                c.syncs_started += 1;
                c.open_syncs.insert(*sync_id, event.timestamp);
            }
            EventPayload::SyncCompleted {
                sync_id,
                duration_ms,
                success,
                ..
            } => {
                if *success {
                    c.syncs_succeeded += 1;
                } else {
                    c.syncs_failed += 1;
                }
                if c.open_syncs.remove(sync_id).is_some() {
                    c.paired_syncs += 1;
                    c.total_sync_ms += duration_ms;
                }
            }
            EventPayload::ConflictDetected { .. } => {
                c.conflicts_detected += 1;
            }
            EventPayload::SyncStatusChanged { .. } => {}
        }
    }

    /// Produces analytics for `state` as of `now`.
    pub fn snapshot(&self, state: &CartState, now: DateTime<Utc>) -> CartAnalytics {
        let c = self.counters.lock();

        let sync = if c.syncs_started == 0 {
            SyncPerformance::default()
        } else {
            let started = c.syncs_started as f64;
            SyncPerformance {
                average_duration_ms: if c.paired_syncs == 0 {
                    0.0
                } else {
                    c.total_sync_ms as f64 / c.paired_syncs as f64
                },
                success_rate: c.syncs_succeeded as f64 / started,
                error_rate: c.syncs_failed as f64 / started,
            }
        };

        CartAnalytics {
            items_added: c.items_added,
            items_removed: c.items_removed,
            carts_cleared: c.carts_cleared,
            rules_applied: c.rules_applied,
            syncs_started: c.syncs_started,
            syncs_succeeded: c.syncs_succeeded,
            syncs_failed: c.syncs_failed,
            conflicts_detected: c.conflicts_detected,
            item_count: state.items.len(),
            total_value: state.metadata.total_value,
            total_display_value: state.metadata.total_display_value,
            conversion_potential: conversion_potential(state.items.len(), c.last_activity, now),
            last_activity: c.last_activity,
            sync,
        }
    }
}

/// Scores a cart from 0 to 100.
///
/// Up to 50 points come from the number of lines (5 per line, capped at
/// 10 lines) and up to 50 from recency of the last activity, decaying
/// linearly to zero over an hour. An empty cart scores 0.
pub fn conversion_potential(
    item_count: usize,
    last_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> u8 {
    if item_count == 0 {
        return 0;
    }
    let items = (item_count as u64).min(SCORE_ITEM_CAP) * SCORE_PER_ITEM;

    let recency = match last_activity {
        None => 0.0,
        Some(at) => {
            let idle = (now - at).num_milliseconds().max(0) as f64 / 1000.0;
            (SCORE_RECENCY_MAX * (1.0 - idle / SCORE_RECENCY_WINDOW_SECS)).max(0.0)
        }
    };

    (items + recency.floor() as u64).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CartConfig;
    use crate::event::EventSource;
    use crate::item::{CartItem, Quote};
    use chrono::Duration;

    fn event(payload: EventPayload, at: DateTime<Utc>) -> CartEvent {
        CartEvent::new(payload, EventSource::Sync, at)
    }

    #[test]
    fn counts_item_events() {
        let agg = AnalyticsAggregator::new();
        let now = Utc::now();
        let item = CartItem::new(Quote::new("A", "a", Decimal::ONE), None, now);

        agg.record(&event(EventPayload::ItemAdded { item: item.clone() }, now));
        agg.record(&event(EventPayload::ItemRemoved { item }, now));
        agg.record(&event(EventPayload::CartCleared { removed: 0 }, now));

        let state = CartState::new(&CartConfig::default(), now);
        let a = agg.snapshot(&state, now);
        assert_eq!(a.items_added, 1);
        assert_eq!(a.items_removed, 1);
        assert_eq!(a.carts_cleared, 1);
        assert_eq!(a.last_activity, Some(now));
    }

    #[test]
    fn sync_performance_from_pairs() {
        let agg = AnalyticsAggregator::new();
        let now = Utc::now();
        for (id, ms, ok) in [(1, 100, true), (2, 300, true), (3, 200, false)] {
            agg.record(&event(EventPayload::SyncStarted { sync_id: id }, now));
            agg.record(&event(
                EventPayload::SyncCompleted {
                    sync_id: id,
                    duration_ms: ms,
                    success: ok,
                    error: None,
                },
                now,
            ));
        }
        // started but never completed
        agg.record(&event(EventPayload::SyncStarted { sync_id: 4 }, now));

        let state = CartState::new(&CartConfig::default(), now);
        let a = agg.snapshot(&state, now);
        assert_eq!(a.syncs_started, 4);
        assert_eq!(a.sync.average_duration_ms, 200.0);
        assert_eq!(a.sync.success_rate, 0.5);
        assert_eq!(a.sync.error_rate, 0.25);
    }

    #[test]
    fn no_syncs_means_zero_rates() {
        let agg = AnalyticsAggregator::new();
        let state = CartState::new(&CartConfig::default(), Utc::now());
        assert_eq!(agg.snapshot(&state, Utc::now()).sync, SyncPerformance::default());
    }

    #[test]
    fn conversion_potential_is_monotonic() {
        let now = Utc::now();
        assert_eq!(conversion_potential(0, Some(now), now), 0);
        assert_eq!(conversion_potential(1, Some(now), now), 55);
        assert_eq!(conversion_potential(10, Some(now), now), 100);
        assert_eq!(conversion_potential(30, Some(now), now), 100);

        let half_hour = now - Duration::minutes(30);
        assert_eq!(conversion_potential(2, Some(half_hour), now), 35);
        let stale = now - Duration::hours(3);
        assert_eq!(conversion_potential(2, Some(stale), now), 10);
        assert_eq!(conversion_potential(2, None, now), 10);

        let mut previous = 0;
        for n in 0..15 {
            let score = conversion_potential(n, Some(half_hour), now);
            assert!(score >= previous);
            previous = score;
        }
    }
}
