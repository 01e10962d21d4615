//! Remote authority abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quotecart_core::{CartItem, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// The remote copy of a cart at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Remote lines in remote order.
    pub items: Vec<CartItem>,
    /// Version marker. Increases on every remote write; 0 means the remote
    /// has never stored this cart.
    pub version: u64,
    /// When the remote copy last changed.
    pub modified_at: DateTime<Utc>,
}

impl RemoteSnapshot {
    /// Creates the snapshot of a cart the remote has never stored.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            version: 0,
            modified_at: DateTime::<Utc>::default(),
        }
    }
}

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushAck {
    /// The remote stored the payload at `version`.
    Accepted {
        /// New remote version.
        version: u64,
    },
    /// The remote moved past the expected version and kept its copy.
    Conflict {
        /// The remote copy as it stands.
        remote: RemoteSnapshot,
    },
}

/// The server holding the authoritative copy of a session's cart.
///
/// Implementations report [`SyncError::Unreachable`] when the server cannot
/// be reached at all, [`SyncError::Transport`] for failures worth retrying
/// and [`SyncError::Validation`] when the payload is rejected.
#[async_trait]
pub trait RemoteCart: Send + Sync {
    /// Fetches the remote copy.
    async fn pull(&self, session: &SessionId) -> SyncResult<RemoteSnapshot>;

    /// Stores `items` as the remote copy.
    ///
    /// With `expected_version`, the write only succeeds if the remote is
    /// still at that version. Without it the remote copy is overwritten.
    async fn push(
        &self,
        session: &SessionId,
        items: &[CartItem],
        expected_version: Option<u64>,
    ) -> SyncResult<PushAck>;
}

/// An in-memory remote for tests and demos.
///
/// Reachability, latency and one-shot failures can be injected, and the
/// stored copy can be edited as if by another device.
#[derive(Debug)]
pub struct MemoryRemote {
    carts: Mutex<HashMap<SessionId, RemoteSnapshot>>,
    reachable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<SyncError>>,
    pulls: AtomicU64,
    pushes: AtomicU64,
}

impl MemoryRemote {
    /// Creates a reachable, empty remote.
    pub fn new() -> Self {
        Self {
            carts: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            latency: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
            pulls: AtomicU64::new(0),
            pushes: AtomicU64::new(0),
        }
    }

    /// Sets whether calls reach the remote.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns true if calls reach the remote.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Makes the next call fail with `error`. Queued failures are consumed
    /// one per call.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    /// Replaces the stored copy as another device would. Returns the new
    /// version.
    pub fn write(&self, session: &SessionId, items: Vec<CartItem>) -> u64 {
        let mut carts = self.carts.lock();
        let entry = carts
            .entry(session.clone())
            .or_insert_with(RemoteSnapshot::empty);
        entry.items = items;
        entry.version += 1;
        entry.modified_at = Utc::now();
        entry.version
    }

    /// Edits the stored copy in place as another device would. Returns the
    /// new version.
    pub fn edit<F>(&self, session: &SessionId, edit: F) -> u64
    where
        F: FnOnce(&mut Vec<CartItem>),
    {
        let mut items = self.snapshot(session).items;
        edit(&mut items);
        self.write(session, items)
    }

    /// Returns the stored copy.
    pub fn snapshot(&self, session: &SessionId) -> RemoteSnapshot {
        self.carts
            .lock()
            .get(session)
            .cloned()
            .unwrap_or_else(RemoteSnapshot::empty)
    }

    /// Returns the number of pulls served.
    pub fn pull_count(&self) -> u64 {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Returns the number of pushes served.
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> SyncResult<()> {
        if !self.is_reachable() {
            return Err(SyncError::Unreachable("memory remote is offline".into()));
        }
        let failure = self.failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteCart for MemoryRemote {
    async fn pull(&self, session: &SessionId) -> SyncResult<RemoteSnapshot> {
        self.enter().await?;
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot(session))
    }

    async fn push(
        &self,
        session: &SessionId,
        items: &[CartItem],
        expected_version: Option<u64>,
    ) -> SyncResult<PushAck> {
        self.enter().await?;

        let mut carts = self.carts.lock();
        let entry = carts
            .entry(session.clone())
            .or_insert_with(RemoteSnapshot::empty);
        if let Some(expected) = expected_version {
            if expected != entry.version {
                return Ok(PushAck::Conflict {
                    remote: entry.clone(),
                });
            }
        }

        entry.items = items.to_vec();
        entry.version += 1;
        entry.modified_at = Utc::now();
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(PushAck::Accepted {
            version: entry.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotecart_core::Quote;
    use rust_decimal::Decimal;

    fn session() -> SessionId {
        SessionId::new("s1")
    }

    fn item(id: &str) -> CartItem {
        CartItem::new(Quote::new(id, id, Decimal::ONE), None, Utc::now())
    }

    #[tokio::test]
    async fn unknown_session_pulls_empty() {
        let remote = MemoryRemote::new();
        let snapshot = remote.pull(&session()).await.unwrap();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.items.is_empty());
        assert_eq!(remote.pull_count(), 1);
    }

    #[tokio::test]
    async fn push_checks_expected_version() {
        let remote = MemoryRemote::new();
        let ack = remote.push(&session(), &[item("A")], Some(0)).await.unwrap();
        assert_eq!(ack, PushAck::Accepted { version: 1 });

        remote.write(&session(), vec![item("B")]);
        let ack = remote.push(&session(), &[item("C")], Some(1)).await.unwrap();
        match ack {
            PushAck::Conflict { remote } => {
                assert_eq!(remote.version, 2);
                assert_eq!(remote.items[0].quote.id.as_str(), "B");
            }
            other => panic!("unexpected ack: {other:?}"),
        }

        // unconditional push overwrites
        let ack = remote.push(&session(), &[item("C")], None).await.unwrap();
        assert_eq!(ack, PushAck::Accepted { version: 3 });
    }

    #[tokio::test]
    async fn injected_failures_and_reachability() {
        let remote = MemoryRemote::new();
        remote.fail_next(SyncError::transport_retryable("reset"));
        assert!(remote.pull(&session()).await.unwrap_err().is_retryable());
        assert!(remote.pull(&session()).await.is_ok());

        remote.set_reachable(false);
        let err = remote.push(&session(), &[], None).await.unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(remote.push_count(), 0);
    }

    #[test]
    fn edit_bumps_version() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.edit(&session(), |items| items.push(item("X"))), 1);
        assert_eq!(remote.edit(&session(), |items| items.clear()), 2);
        assert!(remote.snapshot(&session()).items.is_empty());
    }
}
