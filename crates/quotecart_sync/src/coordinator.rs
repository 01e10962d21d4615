//! Sync coordinator state machine.
//!
//! ```text
//!            local change (debounced) / poll tick
//!   synced ───────────────────────────────────────► syncing
//!     ▲  ▲                                           │ │ │
//!     │  └──────────── accepted, no divergence ──────┘ │ │
//!     │                                                │ │
//!     └── resolution committed ── conflict ◄───────────┘ │
//!                                                        ▼
//!   offline ◄── unreachable (from any state)           error
//! ```
//!
//! A cycle pulls first, then decides against the sync baseline (the
//! content and remote version both sides last agreed on):
//!
//! | remote moved | local changed | action                         |
//! |--------------|---------------|--------------------------------|
//! | no           | no            | nothing                        |
//! | no           | yes           | push                           |
//! | yes          | no            | fast-forward to remote         |
//! | yes          | yes           | resolve with strategy, maybe push |
//!
//! The decision runs under the store's writer lock against the exact state
//! it replaces. A detected divergence moves the status to `conflict` before
//! the resolved content is committed or pushed.
//!
//! The baseline is mirrored into the cart state, so a session hydrated from
//! a cache resumes from what it last agreed on with the remote.

use crate::config::{PromptResolutionScope, SyncConfig};
use crate::conflict::{same_contents, ConflictRecord, ConflictResolver, Resolution};
use crate::error::{SyncError, SyncResult};
use crate::remote::{PushAck, RemoteCart, RemoteSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use quotecart_core::{
    items_digest, CartItem, CartState, CartStore, ConflictStrategy, EventPayload, EventSource,
    SyncBaseline, SyncStatus,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Maximum pull/push rounds in one attempt when the remote keeps moving.
const MAX_PUSH_ROUNDS: usize = 3;

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that completed.
    pub cycles_completed: u64,
    /// Cycles that failed.
    pub cycles_failed: u64,
    /// Successful pulls.
    pub pulls: u64,
    /// Accepted pushes.
    pub pushes: u64,
    /// Retries after transient failures.
    pub retries: u64,
    /// Divergences detected.
    pub conflicts_detected: u64,
    /// Divergences resolved by a strategy.
    pub conflicts_resolved: u64,
    /// Remote copies taken over without a conflict.
    pub fast_forwards: u64,
    /// Network results dropped because connectivity was lost meanwhile.
    pub discarded_results: u64,
    /// Last successful sync.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Identifier shared by the cycle's start and completion events.
    pub sync_id: u64,
    /// Status the cycle left the cart in.
    pub status: SyncStatus,
    /// Whether the remote copy was pulled.
    pub pulled: bool,
    /// Whether local content was pushed.
    pub pushed: bool,
    /// Whether the remote copy replaced unchanged local content.
    pub fast_forwarded: bool,
    /// Changes made by conflict resolution, if a conflict was resolved.
    pub conflict: Option<ConflictRecord>,
    /// Duration of the cycle.
    pub duration: Duration,
}

impl SyncOutcome {
    fn new() -> Self {
        Self {
            sync_id: 0,
            status: SyncStatus::Synced,
            pulled: false,
            pushed: false,
            fast_forwarded: false,
            conflict: None,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Force,
    Resolve(ConflictStrategy),
}

#[derive(Debug, Clone)]
struct Baseline {
    items: Vec<CartItem>,
    version: u64,
    digest: [u8; 32],
}

impl Baseline {
    fn new(items: &[CartItem], version: u64) -> Self {
        Self {
            items: items.to_vec(),
            version,
            digest: items_digest(items),
        }
    }
}

#[derive(Debug)]
enum Step {
    UpToDate,
    FastForward,
    Push { expected: Option<u64> },
    Pending,
}

#[derive(Debug)]
struct Decision {
    step: Step,
    /// Strategy applied to a detected conflict.
    conflict: Option<(ConflictStrategy, usize, usize)>,
    record: Option<ConflictRecord>,
}

impl Decision {
    fn step(step: Step) -> Self {
        Self {
            step,
            conflict: None,
            record: None,
        }
    }
}

/// Decides what a cycle does with `remote`, given the committed `local`
/// state. Returns the items to commit, if any.
fn decide(
    resolver: &ConflictResolver,
    local: &CartState,
    remote: &RemoteSnapshot,
    baseline: &Baseline,
    strategy_override: Option<ConflictStrategy>,
) -> (Option<Vec<CartItem>>, Decision) {
    let local_changed = local.content_digest() != baseline.digest;
    // A remote reset counts as a move too
    let remote_moved = remote.version != baseline.version;

    if !remote_moved {
        let step = if local_changed {
            Step::Push {
                expected: Some(remote.version),
            }
        } else {
            Step::UpToDate
        };
        return (None, Decision::step(step));
    }

    if same_contents(&local.items, &remote.items) {
        return (None, Decision::step(Step::UpToDate));
    }
    if !local_changed {
        return (Some(remote.items.clone()), Decision::step(Step::FastForward));
    }

    let strategy = strategy_override.unwrap_or(local.metadata.conflict_strategy);
    let conflict = Some((strategy, local.items.len(), remote.items.len()));
    match resolver.resolve(&local.items, &remote.items, &baseline.items, strategy) {
        Resolution::Pending => (
            None,
            Decision {
                step: Step::Pending,
                conflict,
                record: None,
            },
        ),
        Resolution::Resolved {
            items,
            record,
            push_required,
            ..
        } => {
            let step = if push_required {
                Step::Push {
                    expected: Some(remote.version),
                }
            } else {
                Step::UpToDate
            };
            let commit = (!record.is_noop()).then_some(items);
            (
                commit,
                Decision {
                    step,
                    conflict,
                    record: Some(record),
                },
            )
        }
    }
}

/// Keeps a [`CartStore`] consistent with its remote authority.
///
/// The coordinator is the only component that talks to the remote. It
/// owns the sync status of the store and runs at most one cycle at a time.
pub struct SyncCoordinator {
    config: SyncConfig,
    store: Arc<CartStore>,
    remote: Arc<dyn RemoteCart>,
    resolver: ConflictResolver,
    baseline: Mutex<Baseline>,
    pending: Mutex<Option<RemoteSnapshot>>,
    online: AtomicBool,
    /// Bumped whenever the host goes offline.
    offline_epoch: AtomicU64,
    /// Bumped on every scheduled push. A timer fires only if it is current.
    debounce_generation: AtomicU64,
    next_sync_id: AtomicU64,
    cycle: tokio::sync::Mutex<()>,
    stats: RwLock<SyncStats>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    polling: AtomicBool,
}

impl SyncCoordinator {
    /// Creates a coordinator. Nothing runs until [`start`](Self::start) or a
    /// sync is requested.
    ///
    /// The sync baseline is taken from the store's cart, if it has one.
    pub fn new(config: SyncConfig, store: Arc<CartStore>, remote: Arc<dyn RemoteCart>) -> Self {
        let baseline = match &store.snapshot().sync_baseline {
            Some(saved) => {
                debug!(version = saved.version, "resuming from saved sync baseline");
                Baseline::new(&saved.items, saved.version)
            }
            None => Baseline::new(&[], 0),
        };
        Self {
            config,
            store,
            remote,
            resolver: ConflictResolver::new(),
            baseline: Mutex::new(baseline),
            pending: Mutex::new(None),
            online: AtomicBool::new(true),
            offline_epoch: AtomicU64::new(0),
            debounce_generation: AtomicU64::new(0),
            next_sync_id: AtomicU64::new(1),
            cycle: tokio::sync::Mutex::new(()),
            stats: RwLock::new(SyncStats::default()),
            tasks: Mutex::new(Vec::new()),
            debounce_task: Mutex::new(None),
            polling: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the current sync status.
    pub fn status(&self) -> SyncStatus {
        self.store.sync_status()
    }

    /// Returns the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true if the host reports connectivity.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns the remote copy a `prompt-user` conflict is waiting on.
    pub fn pending_conflict(&self) -> Option<RemoteSnapshot> {
        self.pending.lock().clone()
    }

    fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Returns true if local content changed since the last sync.
    pub fn is_dirty(&self) -> bool {
        self.store.snapshot().content_digest() != self.baseline.lock().digest
    }

    /// Starts watching the store for local changes. Each change restarts
    /// the debounce timer.
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut changes = self.store.watch_changes();
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let Some(this) = weak.upgrade() else { break };
                this.schedule_push();
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Starts periodic pulls at the configured poll interval.
    ///
    /// Calling it again has no effect.
    pub fn start_polling(self: &Arc<Self>) {
        if self.polling.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.config.poll_interval;
        let handle = tokio::spawn(poll_loop(weak, period));
        self.tasks.lock().push(handle);
        debug!(?period, "polling started");
    }

    /// Stops background tasks. In-flight cycles run to completion.
    pub fn shutdown(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.debounce_generation.fetch_add(1, Ordering::SeqCst);
        self.polling.store(false, Ordering::SeqCst);
    }

    /// Schedules a push after the debounce quiet period, superseding any
    /// earlier schedule.
    pub fn schedule_push(self: &Arc<Self>) {
        if !self.config.auto_push || !self.is_online() {
            return;
        }
        let generation = self.debounce_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak: Weak<Self> = Arc::downgrade(self);
        let delay = self.config.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else { return };
            if this.debounce_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if let Err(e) = this.sync().await {
                debug!(error = %e, "debounced sync did not complete");
            }
        });
        *self.debounce_task.lock() = Some(handle);
    }

    /// Runs one sync cycle.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` while offline, `ConflictUnresolved` while a
    /// `prompt-user` conflict is pending, or the error that ended the cycle
    /// after retries.
    pub async fn sync(&self) -> SyncResult<SyncOutcome> {
        self.run(Mode::Normal).await
    }

    /// Pushes local content over the remote copy unconditionally.
    pub async fn force_push(&self) -> SyncResult<SyncOutcome> {
        self.run(Mode::Force).await
    }

    /// Resolves a pending `prompt-user` conflict with `strategy`.
    ///
    /// With [`PromptResolutionScope::Persist`] the strategy also replaces
    /// `prompt-user` for later conflicts.
    ///
    /// # Errors
    ///
    /// Returns `NoPendingConflict` if nothing is pending and
    /// `ConflictUnresolved` if `strategy` is itself `prompt-user`.
    pub async fn resolve_pending(&self, strategy: ConflictStrategy) -> SyncResult<SyncOutcome> {
        if !self.has_pending() {
            return Err(SyncError::NoPendingConflict);
        }
        if !strategy.auto_resolves() {
            return Err(SyncError::ConflictUnresolved);
        }
        if self.config.prompt_resolution == PromptResolutionScope::Persist {
            self.store.set_conflict_strategy(strategy);
        }
        info!(%strategy, "resolving pending conflict");
        self.run(Mode::Resolve(strategy)).await
    }

    /// Records a connectivity change reported by the host.
    ///
    /// Going offline suspends pushes and discards the results of calls in
    /// flight. Coming back online runs a cycle.
    pub async fn set_online(&self, online: bool) -> SyncResult<Option<SyncOutcome>> {
        let was_online = self.online.swap(online, Ordering::SeqCst);

        if !online {
            if was_online {
                self.offline_epoch.fetch_add(1, Ordering::SeqCst);
                self.debounce_generation.fetch_add(1, Ordering::SeqCst);
                info!("connectivity lost");
            }
            self.transition(SyncStatus::Offline);
            return Ok(None);
        }

        if self.has_pending() {
            self.transition(SyncStatus::Conflict);
            return Ok(None);
        }
        if !was_online || self.status() == SyncStatus::Offline {
            info!(dirty = self.is_dirty(), "connectivity restored");
            return self.sync().await.map(Some);
        }
        Ok(None)
    }

    async fn run(&self, mode: Mode) -> SyncResult<SyncOutcome> {
        if !self.is_online() {
            return Err(SyncError::Unreachable("host is offline".into()));
        }
        let _cycle = self.cycle.lock().await;
        if mode == Mode::Normal && self.has_pending() {
            return Err(SyncError::ConflictUnresolved);
        }

        let epoch = self.offline_epoch.load(Ordering::SeqCst);
        let sync_id = self.next_sync_id.fetch_add(1, Ordering::SeqCst);
        self.store
            .record_event(EventPayload::SyncStarted { sync_id }, EventSource::Sync);
        self.transition(SyncStatus::Syncing);

        let started = Instant::now();
        let mut result = self.run_with_retry(epoch, mode).await;
        if result.is_ok() && self.offline_epoch.load(Ordering::SeqCst) != epoch {
            self.stats.write().discarded_results += 1;
            result = Err(SyncError::Unreachable("connectivity lost during sync".into()));
        }
        let duration = started.elapsed();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(mut outcome) => {
                outcome.sync_id = sync_id;
                outcome.duration = duration;
                self.store.record_event(
                    EventPayload::SyncCompleted {
                        sync_id,
                        duration_ms,
                        success: true,
                        error: None,
                    },
                    EventSource::Sync,
                );
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.last_error = None;
                }
                if outcome.status == SyncStatus::Synced {
                    let now = Utc::now();
                    self.store.mark_synced(now);
                    self.stats.write().last_sync_at = Some(now);
                }
                self.transition(outcome.status);
                Ok(outcome)
            }
            Err(e) => {
                self.store.record_event(
                    EventPayload::SyncCompleted {
                        sync_id,
                        duration_ms,
                        success: false,
                        error: Some(e.to_string()),
                    },
                    EventSource::Sync,
                );
                {
                    let mut stats = self.stats.write();
                    stats.cycles_failed += 1;
                    stats.last_error = Some(e.to_string());
                }
                if e.is_unreachable() || !self.is_online() {
                    self.transition(SyncStatus::Offline);
                } else {
                    warn!(error = %e, "sync failed");
                    self.transition(SyncStatus::Error);
                }
                Err(e)
            }
        }
    }

    async fn run_with_retry(&self, epoch: u64, mode: Mode) -> SyncResult<SyncOutcome> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            match self.attempt(epoch, mode).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    self.stats.write().retries += 1;
                    debug!(attempt, ?delay, error = %e, "retrying sync");
                    tokio::time::sleep(delay).await;
                    if self.offline_epoch.load(Ordering::SeqCst) != epoch {
                        return Err(SyncError::Unreachable("connectivity lost during retry".into()));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, epoch: u64, mode: Mode) -> SyncResult<SyncOutcome> {
        let session = &self.config.session_id;
        let mut outcome = SyncOutcome::new();

        if mode == Mode::Force {
            let state = self.store.snapshot();
            let ack = self
                .call(epoch, self.remote.push(session, &state.items, None))
                .await?;
            let PushAck::Accepted { version } = ack else {
                return Err(SyncError::transport_retryable(
                    "remote refused an unconditional push",
                ));
            };
            self.stats.write().pushes += 1;
            self.set_baseline(&state.items, version);
            self.pending.lock().take();
            outcome.pushed = true;
            return Ok(outcome);
        }

        let mut remote = self.call(epoch, self.remote.pull(session)).await?;
        self.stats.write().pulls += 1;
        outcome.pulled = true;
        let strategy_override = match mode {
            Mode::Resolve(strategy) => Some(strategy),
            _ => None,
        };

        for _ in 0..MAX_PUSH_ROUNDS {
            let baseline = self.baseline.lock().clone();
            let (state, decision) = self
                .store
                .reconcile("sync", |local| {
                    let (commit, decision) =
                        decide(&self.resolver, local, &remote, &baseline, strategy_override);
                    if let Some((strategy, local_items, remote_items)) = decision.conflict {
                        self.report_conflict(strategy, local_items, remote_items);
                    }
                    (commit, decision)
                })
                .await;

            if let Some(record) = decision.record {
                if record.is_lossy() {
                    warn!(
                        discarded = record.discarded_local.len(),
                        "server copy discarded local additions"
                    );
                }
                self.stats.write().conflicts_resolved += 1;
                outcome.conflict = Some(record);
            }

            match decision.step {
                Step::UpToDate => {
                    self.set_baseline(&state.items, remote.version);
                    self.pending.lock().take();
                    return Ok(outcome);
                }
                Step::FastForward => {
                    debug!(version = remote.version, "fast-forwarded to remote copy");
                    self.stats.write().fast_forwards += 1;
                    self.set_baseline(&state.items, remote.version);
                    self.pending.lock().take();
                    outcome.fast_forwarded = true;
                    return Ok(outcome);
                }
                Step::Pending => {
                    *self.pending.lock() = Some(remote);
                    outcome.status = SyncStatus::Conflict;
                    return Ok(outcome);
                }
                Step::Push { expected } => {
                    let ack = self
                        .call(epoch, self.remote.push(session, &state.items, expected))
                        .await?;
                    match ack {
                        PushAck::Accepted { version } => {
                            self.stats.write().pushes += 1;
                            self.set_baseline(&state.items, version);
                            self.pending.lock().take();
                            outcome.pushed = true;
                            return Ok(outcome);
                        }
                        PushAck::Conflict { remote: newer } => {
                            debug!(version = newer.version, "remote moved during push");
                            remote = newer;
                        }
                    }
                }
            }
        }

        Err(SyncError::transport_retryable(
            "remote kept changing during sync",
        ))
    }

    /// Bounds a network call by the timeout and discards its result if the
    /// host went offline while it ran.
    async fn call<T, F>(&self, epoch: u64, call: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        let result = match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        };
        if self.offline_epoch.load(Ordering::SeqCst) != epoch {
            self.stats.write().discarded_results += 1;
            debug!("discarding result of a call that outlived connectivity");
            return Err(SyncError::Unreachable("connectivity lost during call".into()));
        }
        result
    }

    fn report_conflict(&self, strategy: ConflictStrategy, local_items: usize, remote_items: usize) {
        self.stats.write().conflicts_detected += 1;
        info!(%strategy, local_items, remote_items, "conflict detected");
        self.store.record_event(
            EventPayload::ConflictDetected {
                strategy,
                local_items,
                remote_items,
            },
            EventSource::Sync,
        );
        self.transition(SyncStatus::Conflict);
    }

    fn set_baseline(&self, items: &[CartItem], version: u64) {
        *self.baseline.lock() = Baseline::new(items, version);
        self.store
            .set_sync_baseline(SyncBaseline::new(items.to_vec(), version));
    }

    fn transition(&self, to: SyncStatus) {
        let from = self.store.set_sync_status(to);
        if from != to {
            info!(%from, %to, "sync status changed");
            self.store
                .record_event(EventPayload::SyncStatusChanged { from, to }, EventSource::Sync);
        }
    }
}

async fn poll_loop(coordinator: Weak<SyncCoordinator>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(this) = coordinator.upgrade() else { break };
        if !this.is_online() || this.has_pending() {
            continue;
        }
        if let Err(e) = this.sync().await {
            debug!(error = %e, "poll sync did not complete");
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.debounce_task.lock().take() {
            handle.abort();
        }
    }
}
