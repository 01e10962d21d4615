//! Integration tests for sessions, the coordinator and a shared remote.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use quotecart_core::{
    CartConfig, CartItem, ConflictStrategy, EventKind, EventPayload, ItemMetadata, Quote,
    SessionId, SyncStatus,
};
use quotecart_sync::{
    CartPersistence, CartSession, ConflictResolver, FilePersistence, MemoryRemote,
    PromptResolutionScope, PushAck, RemoteCart, RemoteSnapshot, Resolution, SyncConfig,
    SyncResult,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A remote where another device writes right before the first push lands.
struct RacingRemote {
    inner: MemoryRemote,
    raced: AtomicBool,
}

impl RacingRemote {
    fn new() -> Self {
        Self {
            inner: MemoryRemote::new(),
            raced: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RemoteCart for RacingRemote {
    async fn pull(&self, session: &SessionId) -> SyncResult<RemoteSnapshot> {
        self.inner.pull(session).await
    }

    async fn push(
        &self,
        session: &SessionId,
        items: &[CartItem],
        expected_version: Option<u64>,
    ) -> SyncResult<PushAck> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.inner.edit(session, |remote| {
                remote.push(CartItem::new(quote("RACE"), None, Utc::now()))
            });
        }
        self.inner.push(session, items, expected_version).await
    }
}

fn quote(id: &str) -> Quote {
    Quote::new(id, format!("Quote {id}"), Decimal::new(1000, 2))
}

fn session_id() -> SessionId {
    SessionId::new("shared")
}

fn manual_sync() -> SyncConfig {
    SyncConfig::new("shared").with_auto_push(false)
}

async fn device(remote: &Arc<MemoryRemote>, config: SyncConfig) -> CartSession {
    device_with(remote, CartConfig::default(), config).await
}

async fn device_with(
    remote: &Arc<MemoryRemote>,
    cart: CartConfig,
    config: SyncConfig,
) -> CartSession {
    CartSession::open(cart, config, Arc::clone(remote) as Arc<dyn RemoteCart>, None).await
}

fn quotes(session: &CartSession) -> Vec<String> {
    session
        .items()
        .iter()
        .map(|i| i.quote.id.as_str().to_string())
        .collect()
}

#[tokio::test]
async fn two_devices_converge_with_merge() {
    let remote = Arc::new(MemoryRemote::new());

    let phone = device(&remote, manual_sync()).await;
    phone.add_item(quote("X"), None).await.unwrap();
    phone.sync_with_server().await.unwrap();

    let laptop = device(&remote, manual_sync()).await;
    assert_eq!(quotes(&laptop), vec!["X"]);

    laptop.add_item(quote("Y"), None).await.unwrap();
    phone.add_item(quote("Z"), None).await.unwrap();
    laptop.sync_with_server().await.unwrap();

    let outcome = phone.sync_with_server().await.unwrap();
    assert!(outcome.conflict.is_some());
    assert!(outcome.pushed);
    assert_eq!(quotes(&phone), vec!["X", "Z", "Y"]);

    let outcome = laptop.sync_with_server().await.unwrap();
    assert!(outcome.fast_forwarded);
    assert_eq!(quotes(&laptop), quotes(&phone));
    assert_eq!(phone.sync_status(), SyncStatus::Synced);
    assert_eq!(laptop.sync_status(), SyncStatus::Synced);
}

#[tokio::test(start_paused = true)]
async fn offline_edits_are_pushed_on_reconnect() {
    let remote = Arc::new(MemoryRemote::new());
    let session = device(
        &remote,
        SyncConfig::new("shared").with_debounce(Duration::from_millis(200)),
    )
    .await;
    let mut events = session.subscribe();

    session.set_online(false).await.unwrap();
    assert_eq!(session.sync_status(), SyncStatus::Offline);
    session.add_item(quote("A"), None).await.unwrap();
    session.add_item(quote("B"), None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(remote.push_count(), 0);
    assert!(session.coordinator().is_dirty());

    let outcome = session.set_online(true).await.unwrap().unwrap();
    assert!(outcome.pushed);
    assert_eq!(session.sync_status(), SyncStatus::Synced);
    let stored: Vec<_> = remote
        .snapshot(&session_id())
        .items
        .iter()
        .map(|i| i.quote.id.as_str().to_string())
        .collect();
    assert_eq!(stored, vec!["A", "B"]);

    let mut kinds = Vec::new();
    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event.payload {
            EventPayload::SyncStatusChanged { to, .. } => statuses.push(to),
            _ => kinds.push(event.kind()),
        }
    }
    assert_eq!(
        statuses,
        vec![SyncStatus::Offline, SyncStatus::Syncing, SyncStatus::Synced]
    );
    assert_eq!(
        kinds,
        vec![
            EventKind::ItemAdded,
            EventKind::ItemAdded,
            EventKind::SyncStarted,
            EventKind::SyncCompleted,
        ]
    );
}

#[tokio::test]
async fn server_wins_reports_lost_local_additions() {
    let remote = Arc::new(MemoryRemote::new());
    let session = device_with(
        &remote,
        CartConfig::new().conflict_strategy(ConflictStrategy::ServerWins),
        manual_sync(),
    )
    .await;

    session.add_item(quote("MINE"), None).await.unwrap();
    remote.write(
        &session_id(),
        vec![CartItem::new(quote("THEIRS"), None, Utc::now())],
    );

    let outcome = session.sync_with_server().await.unwrap();
    let record = outcome.conflict.unwrap();
    assert!(record.is_lossy());
    assert_eq!(record.discarded_local.len(), 1);
    assert!(!outcome.pushed);
    assert_eq!(quotes(&session), vec!["THEIRS"]);

    // the discarded addition is still in history
    session.undo().await.unwrap();
    assert_eq!(quotes(&session), vec!["MINE"]);
}

#[tokio::test]
async fn persisted_prompt_resolution_applies_to_later_conflicts() {
    let remote = Arc::new(MemoryRemote::new());
    let session = device_with(
        &remote,
        CartConfig::new().conflict_strategy(ConflictStrategy::PromptUser),
        manual_sync().with_prompt_resolution(PromptResolutionScope::Persist),
    )
    .await;

    session.add_item(quote("L1"), None).await.unwrap();
    remote.edit(&session_id(), |items| {
        items.push(CartItem::new(quote("R1"), None, Utc::now()))
    });
    let outcome = session.sync_with_server().await.unwrap();
    assert_eq!(outcome.status, SyncStatus::Conflict);
    assert!(session.coordinator().pending_conflict().is_some());

    session.resolve_conflict(ConflictStrategy::Merge).await.unwrap();
    assert_eq!(session.sync_status(), SyncStatus::Synced);
    assert_eq!(session.metadata().conflict_strategy, ConflictStrategy::Merge);

    session.add_item(quote("L2"), None).await.unwrap();
    remote.edit(&session_id(), |items| {
        items.push(CartItem::new(quote("R2"), None, Utc::now()))
    });
    let outcome = session.sync_with_server().await.unwrap();
    assert_eq!(outcome.status, SyncStatus::Synced);
    assert_eq!(quotes(&session), vec!["L1", "R1", "L2", "R2"]);
}

#[tokio::test]
async fn remote_moving_during_push_is_reconciled() {
    let remote = Arc::new(RacingRemote::new());
    let session = CartSession::open(
        CartConfig::default(),
        manual_sync(),
        Arc::clone(&remote) as Arc<dyn RemoteCart>,
        None,
    )
    .await;

    session.add_item(quote("LOCAL"), None).await.unwrap();
    let outcome = session.sync_with_server().await.unwrap();
    assert!(outcome.pushed);
    assert!(outcome.conflict.is_some());
    assert_eq!(quotes(&session), vec!["LOCAL", "RACE"]);
    assert_eq!(remote.inner.snapshot(&session_id()).items.len(), 2);
}

#[tokio::test]
async fn analytics_track_sync_cycles() {
    let remote = Arc::new(MemoryRemote::new());
    let session = device(&remote, manual_sync()).await;
    session.add_item(quote("A"), None).await.unwrap();
    session.sync_with_server().await.unwrap();

    remote.set_reachable(false);
    assert!(session.sync_with_server().await.is_err());
    assert_eq!(session.sync_status(), SyncStatus::Offline);

    let analytics = session.get_analytics();
    // initial sync, one success, one failure
    assert_eq!(analytics.syncs_started, 3);
    assert_eq!(analytics.syncs_succeeded, 2);
    assert_eq!(analytics.syncs_failed, 1);
    assert!((analytics.sync.error_rate - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(analytics.items_added, 1);
    assert_eq!(analytics.item_count, 1);
}

#[tokio::test]
async fn file_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cart.cbor");
    let remote = Arc::new(MemoryRemote::new());
    remote.set_reachable(false);

    let open = || {
        CartSession::open(
            CartConfig::default(),
            manual_sync(),
            Arc::clone(&remote) as Arc<dyn RemoteCart>,
            Some(Arc::new(FilePersistence::new(&path)) as Arc<dyn CartPersistence>),
        )
    };

    let first = open().await;
    first
        .add_item(
            quote("A"),
            Some(ItemMetadata::new().with_recorded_price(Decimal::new(999, 2), "EUR")),
        )
        .await
        .unwrap();
    drop(first);

    let second = open().await;
    assert_eq!(quotes(&second), vec!["A"]);
    assert!(second.coordinator().is_dirty());

    // reconnecting pushes the cached cart
    remote.set_reachable(true);
    second.sync_with_server().await.unwrap();
    assert_eq!(remote.snapshot(&session_id()).items.len(), 1);

    second.destroy().unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn restart_from_cache_takes_remote_removals() {
    for strategy in [ConflictStrategy::Merge, ConflictStrategy::ServerWins] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cart.cbor");
        let remote = Arc::new(MemoryRemote::new());
        let open = || {
            CartSession::open(
                CartConfig::new().conflict_strategy(strategy),
                manual_sync(),
                Arc::clone(&remote) as Arc<dyn RemoteCart>,
                Some(Arc::new(FilePersistence::new(&path)) as Arc<dyn CartPersistence>),
            )
        };

        let phone = open().await;
        phone.add_item(quote("X"), None).await.unwrap();
        phone.sync_with_server().await.unwrap();
        drop(phone);

        let laptop = device(&remote, manual_sync()).await;
        assert_eq!(quotes(&laptop), vec!["X"]);
        let x = laptop.items()[0].id;
        laptop.remove_item(x).await.unwrap();
        laptop.sync_with_server().await.unwrap();
        let version = remote.snapshot(&session_id()).version;

        let phone = open().await;
        assert!(quotes(&phone).is_empty(), "{strategy}");
        assert_eq!(phone.sync_status(), SyncStatus::Synced);
        assert_eq!(phone.get_analytics().conflicts_detected, 0);
        assert!(!phone.coordinator().is_dirty());

        let stored = remote.snapshot(&session_id());
        assert!(stored.items.is_empty(), "{strategy}");
        assert_eq!(stored.version, version);
    }
}

fn item_strategy() -> impl Strategy<Value = Vec<CartItem>> {
    prop::collection::vec((0u8..6, any::<bool>(), 0i64..5), 0..6).prop_map(|raw| {
        let mut seen = std::collections::HashSet::new();
        raw.into_iter()
            .filter(|(q, _, _)| seen.insert(*q))
            .map(|(q, flag, updated)| {
                let origin = if flag { "a" } else { "b" };
                let mut item = CartItem::new(
                    quote(&format!("Q{q}")),
                    Some(ItemMetadata::new().with_origin(origin)),
                    Utc.timestamp_opt(0, 0).unwrap(),
                );
                item.touch(Utc.timestamp_opt(updated, 0).unwrap());
                item
            })
            .collect()
    })
}

fn resolved_items(resolution: Resolution) -> Vec<CartItem> {
    match resolution {
        Resolution::Resolved { items, .. } => items,
        Resolution::Pending => panic!("expected a resolution"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn merge_is_idempotent(local in item_strategy(), remote in item_strategy()) {
        let resolver = ConflictResolver::new();
        let once = resolved_items(resolver.resolve(&local, &remote, &[], ConflictStrategy::Merge));
        let twice = resolved_items(resolver.resolve(&once, &remote, &[], ConflictStrategy::Merge));
        prop_assert_eq!(&once, &twice);

        // every quote from either side survives
        for item in local.iter().chain(remote.iter()) {
            prop_assert!(once.iter().any(|i| i.quote.id == item.quote.id));
        }
    }

    #[test]
    fn resolution_is_deterministic(local in item_strategy(), remote in item_strategy()) {
        let resolver = ConflictResolver::new();
        for strategy in [
            ConflictStrategy::ServerWins,
            ConflictStrategy::ClientWins,
            ConflictStrategy::Merge,
        ] {
            prop_assert_eq!(
                resolver.resolve(&local, &remote, &[], strategy),
                resolver.resolve(&local, &remote, &[], strategy)
            );
        }
    }
}
