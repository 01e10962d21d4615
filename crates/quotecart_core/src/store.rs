//! The cart store: single writer, copy-on-write readers.

use crate::analytics::{AnalyticsAggregator, CartAnalytics};
use crate::config::CartConfig;
use crate::error::{CartError, CartResult};
use crate::event::{CartEvent, EventFeed, EventPayload, EventSource};
use crate::item::{CartItem, ItemMetadata, Quote};
use crate::middleware::{CartMiddleware, MiddlewarePipeline, MutationOutcome};
use crate::rules::{CartRule, RuleEngine};
use crate::state::{CartMetadata, CartState, SyncBaseline};
use crate::types::{ConflictStrategy, ItemId, SyncStatus};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Owner of one session's cart.
///
/// `CartStore` is the only way to change a [`CartState`]. It provides:
/// - Serialized mutations (add, remove, clear, undo, redo, remote commits)
/// - Synchronous reads against the last committed state
/// - The rule engine, middleware pipeline and event feed wrapped around
///   every user mutation
///
/// # Consistency
///
/// Writers build a private copy of the state and publish it with a single
/// pointer swap, so a reader always sees items and metadata from the same
/// commit. Mutations are queued on a FIFO async lock: one suspended on a
/// middleware hook or rule action holds back later ones.
///
/// ```rust,ignore
/// let store = CartStore::new(CartConfig::default());
/// let item = store.add_item(quote, None).await?;
/// assert!(store.has_item(item.id));
/// store.undo().await?;
/// assert!(!store.has_item(item.id));
/// ```
///
/// # Session fields
///
/// `sync_status`, `sync_baseline`, `metadata.last_synced_at` and
/// `metadata.conflict_strategy` are owned by the sync side and change
/// without the writer lock. A commit always carries them over from the slot
/// it replaces.
pub struct CartStore {
    /// Configuration.
    config: CartConfig,
    /// Last committed state.
    committed: RwLock<Arc<CartState>>,
    /// Serializes writers in submission order.
    writer: Mutex<()>,
    /// Business rules run after every user mutation.
    rules: RuleEngine,
    /// Hooks around every user mutation.
    middleware: MiddlewarePipeline,
    /// Event distribution.
    feed: EventFeed,
    /// Counters fed by every emitted event.
    analytics: AnalyticsAggregator,
    /// Local revision, bumped on every local commit.
    changes: watch::Sender<u64>,
}

impl CartStore {
    /// Creates a store holding an empty cart.
    pub fn new(config: CartConfig) -> Self {
        let state = CartState::new(&config, Utc::now());
        Self::from_state(config, state)
    }

    /// Creates a store around an existing cart, as when hydrating from a
    /// cache or a remote copy.
    pub fn from_state(config: CartConfig, mut state: CartState) -> Self {
        state.recompute_metadata();
        state.clamp_history(config.max_history_size, Utc::now());

        let (changes, _) = watch::channel(0);
        Self {
            feed: EventFeed::new(config.event_history_limit),
            config,
            committed: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
            rules: RuleEngine::new(),
            middleware: MiddlewarePipeline::new(),
            analytics: AnalyticsAggregator::new(),
            changes,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CartConfig {
        &self.config
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns the last committed state.
    pub fn snapshot(&self) -> Arc<CartState> {
        self.committed.read().clone()
    }

    /// Returns the current lines.
    pub fn items(&self) -> Vec<CartItem> {
        self.snapshot().items.clone()
    }

    /// Returns the current metadata.
    pub fn metadata(&self) -> CartMetadata {
        self.snapshot().metadata.clone()
    }

    /// Returns the line with the given ID.
    pub fn get_item(&self, item_id: ItemId) -> Option<CartItem> {
        self.committed.read().get_item(item_id).cloned()
    }

    /// Returns true if a line with the given ID exists.
    pub fn has_item(&self, item_id: ItemId) -> bool {
        self.committed.read().has_item(item_id)
    }

    /// Returns the base-currency total.
    pub fn total_value(&self) -> Decimal {
        self.committed.read().total_value()
    }

    /// Returns the sync status.
    pub fn sync_status(&self) -> SyncStatus {
        self.committed.read().sync_status
    }

    /// Returns true if an undo step is available.
    pub fn can_undo(&self) -> bool {
        self.committed.read().history.can_undo()
    }

    /// Returns true if a redo step is available.
    pub fn can_redo(&self) -> bool {
        self.committed.read().history.can_redo()
    }

    /// Returns analytics for the current cart.
    pub fn analytics(&self) -> CartAnalytics {
        self.analytics.snapshot(&self.snapshot(), Utc::now())
    }

    // ========================================================================
    // User mutations
    // ========================================================================

    /// Adds a quote as a new line.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateItem` if the quote is already in the cart, or
    /// `MiddlewareRejected` if a `before` hook vetoed the change.
    pub async fn add_item(
        &self,
        quote: Quote,
        metadata: Option<ItemMetadata>,
    ) -> CartResult<CartItem> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot();
        if current.contains_quote(&quote.id) {
            return Err(CartError::DuplicateItem { quote_id: quote.id });
        }

        let now = Utc::now();
        let item = CartItem::new(quote, metadata, now);
        let event = CartEvent::new(
            EventPayload::ItemAdded { item: item.clone() },
            EventSource::User,
            now,
        );
        self.middleware.run_before(&event, &current).await?;

        let mut draft = (*current).clone();
        draft.push_item(item.clone())?;
        self.finish(draft, event, "add-item", now).await;
        Ok(item)
    }

    /// Removes a line.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no line has the ID, or `MiddlewareRejected`.
    pub async fn remove_item(&self, item_id: ItemId) -> CartResult<CartItem> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot();
        let item = current
            .get_item(item_id)
            .cloned()
            .ok_or(CartError::NotFound { item_id })?;

        let now = Utc::now();
        let event = CartEvent::new(
            EventPayload::ItemRemoved { item: item.clone() },
            EventSource::User,
            now,
        );
        self.middleware.run_before(&event, &current).await?;

        let mut draft = (*current).clone();
        draft.remove_item(item_id)?;
        self.finish(draft, event, "remove-item", now).await;
        Ok(item)
    }

    /// Removes every line. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `MiddlewareRejected` if a `before` hook vetoed the change.
    pub async fn clear(&self) -> CartResult<usize> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot();

        let now = Utc::now();
        let event = CartEvent::new(
            EventPayload::CartCleared {
                removed: current.len(),
            },
            EventSource::User,
            now,
        );
        self.middleware.run_before(&event, &current).await?;

        let mut draft = (*current).clone();
        let removed = draft.clear_items();
        self.finish(draft, event, "clear", now).await;
        Ok(removed)
    }

    /// Steps back to the previous snapshot.
    ///
    /// Contents and estimates are restored. Session fields are kept. No
    /// event is emitted.
    ///
    /// # Errors
    ///
    /// Returns `NothingToUndo` at the oldest retained snapshot.
    pub async fn undo(&self) -> CartResult<Arc<CartState>> {
        let _writer = self.writer.lock().await;
        let mut draft = (*self.snapshot()).clone();
        let snapshot = draft.history.undo()?;
        draft.restore(&snapshot);
        debug!(sequence = snapshot.sequence, action = %snapshot.action, "undo");
        Ok(self.commit_local(draft))
    }

    /// Steps forward to the next snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NothingToRedo` at the newest snapshot.
    pub async fn redo(&self) -> CartResult<Arc<CartState>> {
        let _writer = self.writer.lock().await;
        let mut draft = (*self.snapshot()).clone();
        let snapshot = draft.history.redo()?;
        draft.restore(&snapshot);
        debug!(sequence = snapshot.sequence, action = %snapshot.action, "redo");
        Ok(self.commit_local(draft))
    }

    // ========================================================================
    // Sync-side operations
    // ========================================================================

    /// Runs `decide` against the committed state under the writer lock and
    /// commits the items it returns, if any.
    ///
    /// This is how reconciled remote content enters the store: the decision
    /// sees exactly the state it replaces, so no local mutation can slip in
    /// between. The commit is recorded in history under `label` but runs no
    /// rules or middleware, emits no item events and does not count as a
    /// local change.
    pub async fn reconcile<T, F>(&self, label: &str, decide: F) -> (Arc<CartState>, T)
    where
        F: FnOnce(&CartState) -> (Option<Vec<CartItem>>, T),
    {
        let _writer = self.writer.lock().await;
        let current = self.snapshot();
        let (items, out) = decide(&current);
        let Some(items) = items else {
            return (current, out);
        };

        let mut draft = (*current).clone();
        draft.replace_items(items);
        draft.record_history(label, Utc::now());
        let state = self.commit(draft);
        debug!(label, items = state.len(), "remote content committed");
        (state, out)
    }

    /// Replaces the contents with `items` from the remote authority.
    pub async fn commit_remote(&self, items: Vec<CartItem>, label: &str) -> Arc<CartState> {
        self.reconcile(label, |_| (Some(items), ())).await.0
    }

    /// Sets the sync status. Returns the previous status.
    pub fn set_sync_status(&self, status: SyncStatus) -> SyncStatus {
        let mut slot = self.committed.write();
        let previous = slot.sync_status;
        if previous != status {
            Arc::make_mut(&mut *slot).sync_status = status;
        }
        previous
    }

    /// Records a successful sync at `at`.
    pub fn mark_synced(&self, at: DateTime<Utc>) {
        let mut slot = self.committed.write();
        Arc::make_mut(&mut *slot).metadata.last_synced_at = Some(at);
    }

    /// Records the content and remote version both sides agree on.
    pub fn set_sync_baseline(&self, baseline: SyncBaseline) {
        let mut slot = self.committed.write();
        Arc::make_mut(&mut *slot).sync_baseline = Some(baseline);
    }

    /// Sets the conflict strategy recorded in the metadata.
    pub fn set_conflict_strategy(&self, strategy: ConflictStrategy) {
        let mut slot = self.committed.write();
        if slot.metadata.conflict_strategy != strategy {
            Arc::make_mut(&mut *slot).metadata.conflict_strategy = strategy;
        }
    }

    /// Emits an event that is not tied to a store mutation.
    pub fn record_event(&self, payload: EventPayload, source: EventSource) -> CartEvent {
        self.publish(CartEvent::new(payload, source, Utc::now()))
    }

    // ========================================================================
    // Registration and observation
    // ========================================================================

    /// Returns the rule engine.
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Registers a business rule.
    pub fn register_rule(&self, rule: CartRule) {
        self.rules.register(rule);
    }

    /// Returns the middleware pipeline.
    pub fn middleware(&self) -> &MiddlewarePipeline {
        &self.middleware
    }

    /// Registers a middleware.
    pub fn register_middleware(&self, middleware: CartMiddleware) {
        self.middleware.register(middleware);
    }

    /// Returns the event feed.
    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<CartEvent> {
        self.feed.subscribe()
    }

    /// Returns the local revision counter.
    ///
    /// It increases on every local commit (mutations, undo, redo) and never
    /// on remote commits.
    pub fn local_revision(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Watches the local revision counter.
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Completes a user mutation that passed the `before` hooks.
    async fn finish(
        &self,
        mut draft: CartState,
        event: CartEvent,
        action: &str,
        now: DateTime<Utc>,
    ) -> Arc<MutationOutcome> {
        let rules = self.rules.apply(&mut draft, now).await;
        let history_sequence = draft.record_history(action, now);
        let state = self.commit_local(draft);

        let event = self.publish(event);
        for applied in &rules.applied {
            self.publish(CartEvent::new(
                EventPayload::RuleApplied {
                    rule: applied.name.clone(),
                    priority: applied.priority,
                },
                EventSource::Rule,
                now,
            ));
        }
        debug!(
            kind = %event.kind(),
            sequence = event.sequence,
            items = state.len(),
            rules = rules.applied.len(),
            "mutation committed"
        );

        let outcome = Arc::new(MutationOutcome {
            event: event.clone(),
            rules,
            history_sequence,
        });
        self.middleware.run_after(&event, &state, &outcome).await;
        outcome
    }

    fn commit_local(&self, draft: CartState) -> Arc<CartState> {
        let state = self.commit(draft);
        self.changes.send_modify(|revision| *revision += 1);
        state
    }

    fn commit(&self, mut draft: CartState) -> Arc<CartState> {
        let mut slot = self.committed.write();
        draft.sync_status = slot.sync_status;
        draft.sync_baseline = slot.sync_baseline.clone();
        draft.metadata.last_synced_at = slot.metadata.last_synced_at;
        draft.metadata.conflict_strategy = slot.metadata.conflict_strategy;
        let state = Arc::new(draft);
        *slot = Arc::clone(&state);
        state
    }

    fn publish(&self, event: CartEvent) -> CartEvent {
        let event = self.feed.emit(event);
        self.analytics.record(&event);
        event
    }
}

impl Default for CartStore {
    fn default() -> Self {
        Self::new(CartConfig::default())
    }
}

impl fmt::Debug for CartStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("CartStore")
            .field("items", &state.len())
            .field("sync_status", &state.sync_status)
            .field("rules", &self.rules.len())
            .field("middleware", &self.middleware.len())
            .field("local_revision", &self.local_revision())
            .finish()
    }
}
