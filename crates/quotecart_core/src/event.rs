//! Cart events and the feed that distributes them.
//!
//! Every state-affecting occurrence produces one immutable [`CartEvent`].
//! The feed assigns sequence numbers in commit order, keeps a bounded
//! backlog for polling, and fans events out to subscribers.
//!
//! Each subscriber has a channel as deep as the backlog. A subscriber that
//! falls that far behind is disconnected; it can resume from the last
//! sequence it saw with [`EventFeed::poll`] and subscribe again.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut events = store.subscribe();
//! store.add_item(quote, None).await?;
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.kind(), EventKind::ItemAdded);
//! ```

use crate::item::CartItem;
use crate::types::{ConflictStrategy, SyncStatus};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::warn;

/// Tag identifying the kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A line was added.
    ItemAdded,
    /// A line was removed.
    ItemRemoved,
    /// All lines were removed.
    CartCleared,
    /// A sync cycle began.
    SyncStarted,
    /// A sync cycle ended (successfully or not).
    SyncCompleted,
    /// The sync status changed.
    SyncStatusChanged,
    /// Local and remote diverged.
    ConflictDetected,
    /// A business rule changed the cart.
    RuleApplied,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::ItemAdded => "item-added",
            EventKind::ItemRemoved => "item-removed",
            EventKind::CartCleared => "cart-cleared",
            EventKind::SyncStarted => "sync-started",
            EventKind::SyncCompleted => "sync-completed",
            EventKind::SyncStatusChanged => "sync-status-changed",
            EventKind::ConflictDetected => "conflict-detected",
            EventKind::RuleApplied => "rule-applied",
        };
        f.write_str(s)
    }
}

/// Who caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    /// A user action through the host API.
    User,
    /// The engine itself (undo, hydration).
    System,
    /// The sync coordinator.
    Sync,
    /// A business rule.
    Rule,
}

/// Event-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    /// A line was added.
    ItemAdded {
        /// The new line.
        item: CartItem,
    },
    /// A line was removed.
    ItemRemoved {
        /// The removed line.
        item: CartItem,
    },
    /// All lines were removed.
    CartCleared {
        /// Number of lines removed.
        removed: usize,
    },
    /// A sync cycle began.
    SyncStarted {
        /// Identifier pairing this event with its completion.
        sync_id: u64,
    },
    /// A sync cycle ended.
    SyncCompleted {
        /// Identifier of the matching `SyncStarted`.
        sync_id: u64,
        /// Wall-clock duration of the cycle.
        duration_ms: u64,
        /// Whether the cycle succeeded.
        success: bool,
        /// Error message for failed cycles.
        error: Option<String>,
    },
    /// The sync status changed.
    SyncStatusChanged {
        /// Previous status.
        from: SyncStatus,
        /// New status.
        to: SyncStatus,
    },
    /// Local and remote diverged.
    ConflictDetected {
        /// Strategy that will be applied.
        strategy: ConflictStrategy,
        /// Number of local lines at detection.
        local_items: usize,
        /// Number of remote lines at detection.
        remote_items: usize,
    },
    /// A business rule changed the cart.
    RuleApplied {
        /// Rule name.
        rule: String,
        /// Rule priority.
        priority: i32,
    },
}

impl EventPayload {
    /// Returns the kind tag for this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ItemAdded { .. } => EventKind::ItemAdded,
            EventPayload::ItemRemoved { .. } => EventKind::ItemRemoved,
            EventPayload::CartCleared { .. } => EventKind::CartCleared,
            EventPayload::SyncStarted { .. } => EventKind::SyncStarted,
            EventPayload::SyncCompleted { .. } => EventKind::SyncCompleted,
            EventPayload::SyncStatusChanged { .. } => EventKind::SyncStatusChanged,
            EventPayload::ConflictDetected { .. } => EventKind::ConflictDetected,
            EventPayload::RuleApplied { .. } => EventKind::RuleApplied,
        }
    }
}

/// An immutable record of one state-affecting occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartEvent {
    /// Position in the feed. Zero until the event is emitted.
    pub sequence: u64,
    /// Event data.
    pub payload: EventPayload,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Who caused the event.
    pub source: EventSource,
}

impl CartEvent {
    /// Creates an event that has not been emitted yet.
    pub fn new(payload: EventPayload, source: EventSource, timestamp: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            payload,
            timestamp,
            source,
        }
    }

    /// Returns the kind tag.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Distributes emitted events to subscribers and keeps a polling backlog.
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<CartEvent>>>,
    backlog: RwLock<VecDeque<CartEvent>>,
    max_backlog: usize,
    next_sequence: AtomicU64,
}

impl EventFeed {
    /// Creates a feed keeping up to `max_backlog` events for polling.
    pub fn new(max_backlog: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            backlog: RwLock::new(VecDeque::new()),
            max_backlog,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<CartEvent> {
        let (tx, rx) = mpsc::channel(self.max_backlog.max(1));
        self.subscribers.write().push(tx);
        rx
    }

    /// Stamps the event with the next sequence number and distributes it.
    ///
    /// Returns the stamped event.
    pub fn emit(&self, mut event: CartEvent) -> CartEvent {
        event.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);

        {
            let mut backlog = self.backlog.write();
            backlog.push_back(event.clone());
            while backlog.len() > self.max_backlog {
                backlog.pop_front();
            }
        }

        self.subscribers
            .write()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(sequence = event.sequence, "disconnecting lagging event subscriber");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });
        event
    }

    /// Returns backlog events with sequence > `cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<CartEvent> {
        self.backlog
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in the backlog.
    pub fn backlog_len(&self) -> usize {
        self.backlog.read().len()
    }
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl fmt::Debug for EventFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFeed")
            .field("subscribers", &self.subscriber_count())
            .field("backlog", &self.backlog_len())
            .field("max_backlog", &self.max_backlog)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(n: usize) -> CartEvent {
        CartEvent::new(
            EventPayload::CartCleared { removed: n },
            EventSource::User,
            Utc::now(),
        )
    }

    #[test]
    fn emit_assigns_increasing_sequences() {
        let feed = EventFeed::new(10);
        let a = feed.emit(cleared(1));
        let b = feed.emit(cleared(2));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let feed = EventFeed::new(10);
        let mut rx1 = feed.subscribe();
        let mut rx2 = feed.subscribe();

        let event = feed.emit(cleared(3));
        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[test]
    fn dropped_subscribers_are_removed() {
        let feed = EventFeed::new(10);
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);
        drop(rx);
        feed.emit(cleared(0));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_disconnected_and_can_catch_up() {
        let feed = EventFeed::new(2);
        let mut slow = feed.subscribe();
        let mut fast = feed.subscribe();

        feed.emit(cleared(1));
        assert_eq!(fast.recv().await.unwrap().sequence, 1);
        feed.emit(cleared(2));
        assert_eq!(fast.recv().await.unwrap().sequence, 2);
        feed.emit(cleared(3));
        assert_eq!(feed.subscriber_count(), 1);

        let mut seen = Vec::new();
        while let Some(event) = slow.recv().await {
            seen.push(event.sequence);
        }
        assert_eq!(seen, vec![1, 2]);
        let missed: Vec<_> = feed.poll(2, 10).iter().map(|e| e.sequence).collect();
        assert_eq!(missed, vec![3]);
    }

    #[test]
    fn backlog_is_bounded_and_pollable() {
        let feed = EventFeed::new(3);
        for n in 0..5 {
            feed.emit(cleared(n));
        }
        assert_eq!(feed.backlog_len(), 3);

        let polled = feed.poll(3, 10);
        let sequences: Vec<_> = polled.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![4, 5]);
        assert_eq!(feed.poll(0, 1).len(), 1);
    }

    #[test]
    fn payload_kind_tags() {
        assert_eq!(cleared(0).kind(), EventKind::CartCleared);
        let started = EventPayload::SyncStarted { sync_id: 1 };
        assert_eq!(started.kind(), EventKind::SyncStarted);
        assert_eq!(EventKind::RuleApplied.to_string(), "rule-applied");
    }
}
