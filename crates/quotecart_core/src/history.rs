//! Bounded undo/redo log.
//!
//! Snapshots live in a fixed-capacity ring. Each carries a sequence number
//! that increases monotonically for the lifetime of the log, so a snapshot
//! can be identified even after older ones have been evicted. The cursor is
//! a position inside the ring, which keeps undo and redo O(1).
//!
//! ```text
//!  evicted      retained (capacity = 4)
//!  [s0] [s1] | [s2] [s3] [s4] [s5]
//!                         ^ cursor    undo -> s3, redo -> s5
//! ```

use crate::error::{CartError, CartResult};
use crate::item::CartItem;
use crate::state::CartMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Immutable copy of the cart contents at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    /// Position of the snapshot in the history's lifetime ordering.
    pub sequence: u64,
    /// Items at the time of the snapshot.
    pub items: Vec<CartItem>,
    /// Metadata at the time of the snapshot.
    pub metadata: CartMetadata,
    /// Label of the action that produced this state.
    pub action: String,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// Linear undo/redo log over cart snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryManager {
    snapshots: VecDeque<Arc<CartSnapshot>>,
    capacity: usize,
    /// Index of the snapshot matching the current state.
    position: usize,
    next_sequence: u64,
}

impl HistoryManager {
    /// Creates a log seeded with the initial cart contents.
    pub fn new(
        capacity: usize,
        items: Vec<CartItem>,
        metadata: CartMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        let mut history = Self {
            snapshots: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            position: 0,
            next_sequence: 0,
        };
        history.record(items, metadata, "initial", now);
        history
    }

    /// Appends a snapshot of a committed mutation.
    ///
    /// Any snapshots after the cursor (the redo tail) are discarded first.
    /// Returns the sequence number of the new snapshot.
    pub fn record(
        &mut self,
        items: Vec<CartItem>,
        metadata: CartMetadata,
        action: impl Into<String>,
        now: DateTime<Utc>,
    ) -> u64 {
        if !self.snapshots.is_empty() {
            self.snapshots.truncate(self.position + 1);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.snapshots.push_back(Arc::new(CartSnapshot {
            sequence,
            items,
            metadata,
            action: action.into(),
            timestamp: now,
        }));

        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
        self.position = self.snapshots.len() - 1;
        sequence
    }

    /// Moves the cursor one snapshot back and returns it.
    pub fn undo(&mut self) -> CartResult<Arc<CartSnapshot>> {
        if !self.can_undo() {
            return Err(CartError::NothingToUndo);
        }
        self.position -= 1;
        self.current().ok_or(CartError::NothingToUndo)
    }

    /// Moves the cursor one snapshot forward and returns it.
    pub fn redo(&mut self) -> CartResult<Arc<CartSnapshot>> {
        if !self.can_redo() {
            return Err(CartError::NothingToRedo);
        }
        self.position += 1;
        self.current().ok_or(CartError::NothingToRedo)
    }

    /// Returns true if an older snapshot is retained.
    pub fn can_undo(&self) -> bool {
        self.position > 0
    }

    /// Returns true if a newer snapshot exists after the cursor.
    pub fn can_redo(&self) -> bool {
        self.position + 1 < self.snapshots.len()
    }

    /// Returns the snapshot at the cursor.
    pub fn current(&self) -> Option<Arc<CartSnapshot>> {
        self.snapshots.get(self.position).cloned()
    }

    /// Returns the number of retained snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns true if no snapshots are retained.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Returns the maximum number of retained snapshots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity.
    ///
    /// The snapshot at the cursor is always retained. Undo entries are
    /// evicted oldest first, then redo entries newest first.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.snapshots.len() > self.capacity {
            if self.position > 0 {
                self.snapshots.pop_front();
                self.position -= 1;
            } else {
                self.snapshots.pop_back();
            }
        }
    }

    /// Iterates retained snapshots, oldest first.
    pub fn snapshots(&self) -> impl Iterator<Item = &CartSnapshot> {
        self.snapshots.iter().map(|s| s.as_ref())
    }

    /// Returns the sequence number of the snapshot at the cursor.
    pub fn cursor_sequence(&self) -> Option<u64> {
        self.snapshots.get(self.position).map(|s| s.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Quote;
    use rust_decimal::Decimal;

    fn item(n: u32) -> CartItem {
        CartItem::new(
            Quote::new(format!("Q-{n}"), "test", Decimal::from(n)),
            None,
            Utc::now(),
        )
    }

    fn history(capacity: usize) -> HistoryManager {
        HistoryManager::new(capacity, Vec::new(), CartMetadata::default(), Utc::now())
    }

    #[test]
    fn seeded_with_initial_snapshot() {
        let h = history(5);
        assert_eq!(h.len(), 1);
        assert!(!h.can_undo());
        assert!(!h.can_redo());
        assert_eq!(h.current().unwrap().action, "initial");
    }

    #[test]
    fn undo_redo_walks_the_log() {
        let mut h = history(5);
        h.record(vec![item(1)], CartMetadata::default(), "add", Utc::now());
        h.record(vec![item(1), item(2)], CartMetadata::default(), "add", Utc::now());

        assert_eq!(h.undo().unwrap().items.len(), 1);
        assert_eq!(h.undo().unwrap().items.len(), 0);
        assert!(matches!(h.undo(), Err(CartError::NothingToUndo)));

        assert_eq!(h.redo().unwrap().items.len(), 1);
        assert_eq!(h.redo().unwrap().items.len(), 2);
        assert!(matches!(h.redo(), Err(CartError::NothingToRedo)));
    }

    #[test]
    fn record_after_undo_truncates_redo_tail() {
        let mut h = history(5);
        h.record(vec![item(1)], CartMetadata::default(), "a", Utc::now());
        h.record(vec![item(2)], CartMetadata::default(), "b", Utc::now());
        h.undo().unwrap();

        let seq = h.record(vec![item(3)], CartMetadata::default(), "c", Utc::now());
        assert!(!h.can_redo());
        assert_eq!(h.len(), 3);
        let actions: Vec<_> = h.snapshots().map(|s| s.action.as_str()).collect();
        assert_eq!(actions, vec!["initial", "a", "c"]);
        // sequence numbers keep increasing even after truncation
        assert_eq!(seq, 3);
    }

    #[test]
    fn eviction_keeps_most_recent() {
        let mut h = history(3);
        for n in 0..10 {
            h.record(vec![item(n)], CartMetadata::default(), format!("m{n}"), Utc::now());
            assert!(h.len() <= 3);
        }
        let actions: Vec<_> = h.snapshots().map(|s| s.action.clone()).collect();
        assert_eq!(actions, vec!["m7", "m8", "m9"]);
        let sequences: Vec<_> = h.snapshots().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![8, 9, 10]);
    }

    #[test]
    fn capacity_one_cannot_undo() {
        let mut h = history(1);
        h.record(vec![item(1)], CartMetadata::default(), "add", Utc::now());
        assert_eq!(h.len(), 1);
        assert!(matches!(h.undo(), Err(CartError::NothingToUndo)));
    }

    #[test]
    fn shrinking_capacity_moves_cursor() {
        let mut h = history(5);
        for n in 0..4 {
            h.record(vec![item(n)], CartMetadata::default(), "m", Utc::now());
        }
        h.undo().unwrap();
        h.undo().unwrap();
        h.undo().unwrap();
        let at_cursor = h.current().unwrap();

        h.set_capacity(2);
        assert_eq!(h.len(), 2);
        assert_eq!(h.current().unwrap(), at_cursor);
        assert_eq!(h.cursor_sequence(), Some(1));
        assert!(!h.can_undo());
        assert!(h.can_redo());
        assert_eq!(h.redo().unwrap().sequence, 2);
    }

    #[test]
    fn shrinking_capacity_keeps_cursor_at_oldest_snapshot() {
        let mut h = history(5);
        for n in 0..4 {
            h.record(vec![item(n)], CartMetadata::default(), "m", Utc::now());
        }
        while h.can_undo() {
            h.undo().unwrap();
        }

        h.set_capacity(1);
        assert_eq!(h.len(), 1);
        assert_eq!(h.current().unwrap().action, "initial");
        assert!(!h.can_redo());
    }
}
