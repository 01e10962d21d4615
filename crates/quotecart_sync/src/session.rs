//! Host-facing cart session.

use crate::config::SyncConfig;
use crate::coordinator::{SyncCoordinator, SyncOutcome};
use crate::error::{SyncError, SyncResult};
use crate::persistence::CartPersistence;
use crate::remote::RemoteCart;
use quotecart_core::{
    CartAnalytics, CartConfig, CartEvent, CartItem, CartMetadata, CartMiddleware, CartRule,
    CartState, CartStore, ConflictStrategy, EventPayload, ItemId, ItemMetadata, Quote, SyncStatus,
};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One cart session: a store, its coordinator and an optional cache.
///
/// The session is what a host application holds. It hydrates from the
/// cache on open, pushes local changes after the debounce period and saves
/// the cart after every operation it drives and every background sync that
/// ends `synced`. After [`destroy`] every operation fails with
/// [`SyncError::SessionClosed`].
///
/// [`destroy`]: CartSession::destroy
pub struct CartSession {
    store: Arc<CartStore>,
    coordinator: Arc<SyncCoordinator>,
    persistence: Option<Arc<dyn CartPersistence>>,
    loading: AtomicBool,
    closed: Arc<AtomicBool>,
    cache_task: Option<JoinHandle<()>>,
}

impl CartSession {
    /// Opens a session.
    ///
    /// A cached cart is loaded first, together with the sync baseline it was
    /// saved with; an unreadable cache is logged and ignored. An initial
    /// sync then runs. Its failure leaves the session usable in the
    /// resulting status (`offline` or `error`).
    pub async fn open(
        cart_config: CartConfig,
        sync_config: SyncConfig,
        remote: Arc<dyn RemoteCart>,
        persistence: Option<Arc<dyn CartPersistence>>,
    ) -> Self {
        let cached = match persistence.as_ref().map(|p| p.load()) {
            Some(Ok(state)) => state,
            Some(Err(e)) => {
                warn!(error = %e, "ignoring unreadable cart cache");
                None
            }
            None => None,
        };
        let store = match cached {
            Some(state) => {
                debug!(items = state.len(), "hydrated cart from cache");
                CartStore::from_state(cart_config, state)
            }
            None => CartStore::new(cart_config),
        };
        let store = Arc::new(store);

        let session_id = sync_config.session_id.clone();
        let coordinator = Arc::new(SyncCoordinator::new(sync_config, Arc::clone(&store), remote));
        coordinator.start();

        let closed = Arc::new(AtomicBool::new(false));
        let cache_task = persistence.as_ref().map(|persistence| {
            tokio::spawn(save_after_sync(
                Arc::clone(&store),
                Arc::clone(persistence),
                Arc::clone(&closed),
                store.subscribe(),
            ))
        });

        let session = Self {
            store,
            coordinator,
            persistence,
            loading: AtomicBool::new(true),
            closed,
            cache_task,
        };
        if let Err(e) = session.coordinator.sync().await {
            info!(session = %session_id, error = %e, "initial sync did not complete");
        }
        session.loading.store(false, Ordering::SeqCst);
        session.persist();
        session
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns the committed cart.
    pub fn cart(&self) -> Arc<CartState> {
        self.store.snapshot()
    }

    /// Returns the lines in insertion order.
    pub fn items(&self) -> Vec<CartItem> {
        self.store.items()
    }

    /// Returns the cart metadata.
    pub fn metadata(&self) -> CartMetadata {
        self.store.metadata()
    }

    /// Returns the sync status.
    pub fn sync_status(&self) -> SyncStatus {
        self.store.sync_status()
    }

    /// Returns true while the initial sync runs.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Returns true if the cart has a line with the ID.
    pub fn has_item(&self, item_id: ItemId) -> bool {
        self.store.has_item(item_id)
    }

    /// Returns the line with the ID.
    pub fn get_item(&self, item_id: ItemId) -> Option<CartItem> {
        self.store.get_item(item_id)
    }

    /// Returns the sum of quote totals.
    pub fn get_total_value(&self) -> Decimal {
        self.store.total_value()
    }

    /// Returns analytics for the current cart.
    pub fn get_analytics(&self) -> CartAnalytics {
        self.store.analytics()
    }

    /// Subscribes to cart events.
    pub fn subscribe(&self) -> Receiver<CartEvent> {
        self.store.subscribe()
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<CartStore> {
        &self.store
    }

    /// Returns the sync coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    // ========================================================================
    // Cart operations
    // ========================================================================

    /// Adds a quote to the cart.
    pub async fn add_item(
        &self,
        quote: Quote,
        metadata: Option<ItemMetadata>,
    ) -> SyncResult<CartItem> {
        self.ensure_open()?;
        let item = self.store.add_item(quote, metadata).await?;
        self.persist();
        Ok(item)
    }

    /// Removes a line from the cart.
    pub async fn remove_item(&self, item_id: ItemId) -> SyncResult<CartItem> {
        self.ensure_open()?;
        let item = self.store.remove_item(item_id).await?;
        self.persist();
        Ok(item)
    }

    /// Removes every line. Returns the number removed.
    pub async fn clear_cart(&self) -> SyncResult<usize> {
        self.ensure_open()?;
        let removed = self.store.clear().await?;
        self.persist();
        Ok(removed)
    }

    /// Steps back one history snapshot.
    pub async fn undo(&self) -> SyncResult<Arc<CartState>> {
        self.ensure_open()?;
        let state = self.store.undo().await?;
        self.persist();
        Ok(state)
    }

    /// Steps forward one history snapshot.
    pub async fn redo(&self) -> SyncResult<Arc<CartState>> {
        self.ensure_open()?;
        let state = self.store.redo().await?;
        self.persist();
        Ok(state)
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Runs a sync cycle now.
    pub async fn sync_with_server(&self) -> SyncResult<SyncOutcome> {
        self.ensure_open()?;
        let result = self.coordinator.sync().await;
        self.persist();
        result
    }

    /// Overwrites the remote copy with the local cart.
    pub async fn force_sync_to_server(&self) -> SyncResult<SyncOutcome> {
        self.ensure_open()?;
        let result = self.coordinator.force_push().await;
        self.persist();
        result
    }

    /// Resolves a pending conflict with `strategy`.
    pub async fn resolve_conflict(&self, strategy: ConflictStrategy) -> SyncResult<SyncOutcome> {
        self.ensure_open()?;
        let result = self.coordinator.resolve_pending(strategy).await;
        self.persist();
        result
    }

    /// Reports a connectivity change.
    pub async fn set_online(&self, online: bool) -> SyncResult<Option<SyncOutcome>> {
        self.ensure_open()?;
        let result = self.coordinator.set_online(online).await;
        self.persist();
        result
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Registers a business rule.
    pub fn register_rule(&self, rule: CartRule) -> SyncResult<()> {
        self.ensure_open()?;
        self.store.register_rule(rule);
        Ok(())
    }

    /// Registers a middleware.
    pub fn register_middleware(&self, middleware: CartMiddleware) -> SyncResult<()> {
        self.ensure_open()?;
        self.store.register_middleware(middleware);
        Ok(())
    }

    /// Starts background polling of the remote copy.
    pub fn start_polling(&self) -> SyncResult<()> {
        self.ensure_open()?;
        self.coordinator.start_polling();
        Ok(())
    }

    /// Stops background work and clears the cache.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` if already destroyed, or a persistence
    /// error if the cache cannot be removed.
    pub fn destroy(&self) -> SyncResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(SyncError::SessionClosed);
        }
        self.coordinator.shutdown();
        if let Some(task) = &self.cache_task {
            task.abort();
        }
        if let Some(persistence) = &self.persistence {
            persistence.clear()?;
        }
        info!(session = %self.coordinator.config().session_id, "session destroyed");
        Ok(())
    }

    /// Returns true once the session is destroyed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        Ok(())
    }

    fn persist(&self) {
        if let Some(persistence) = &self.persistence {
            save(&self.store, persistence.as_ref(), &self.closed);
        }
    }
}

impl Drop for CartSession {
    fn drop(&mut self) {
        if let Some(task) = self.cache_task.take() {
            task.abort();
        }
    }
}

fn save(store: &CartStore, persistence: &dyn CartPersistence, closed: &AtomicBool) {
    if closed.load(Ordering::SeqCst) {
        return;
    }
    if let Err(e) = persistence.save(&store.snapshot()) {
        warn!(error = %e, "failed to save cart cache");
    }
}

/// Saves the cart whenever a sync cycle leaves it `synced`, so the cached
/// baseline follows background pushes and polls.
async fn save_after_sync(
    store: Arc<CartStore>,
    persistence: Arc<dyn CartPersistence>,
    closed: Arc<AtomicBool>,
    mut events: Receiver<CartEvent>,
) {
    loop {
        while let Some(event) = events.recv().await {
            if let EventPayload::SyncStatusChanged {
                to: SyncStatus::Synced,
                ..
            } = event.payload
            {
                save(&store, persistence.as_ref(), &closed);
            }
        }
        if closed.load(Ordering::SeqCst) {
            break;
        }
        // Disconnected for lagging behind the feed
        debug!("cache saver resubscribing");
        save(&store, persistence.as_ref(), &closed);
        events = store.subscribe();
    }
}

impl fmt::Debug for CartSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartSession")
            .field("session_id", &self.coordinator.config().session_id)
            .field("items", &self.store.snapshot().len())
            .field("sync_status", &self.sync_status())
            .field("closed", &self.is_closed())
            .finish()
    }
}
