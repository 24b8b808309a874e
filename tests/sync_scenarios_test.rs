//! End-to-end sync scenarios against the in-memory record store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use progress_sync::services::{RetryPolicy, SaveOutcome, SyncScheduler, SyncState};
use progress_sync::session::{self, InMemorySessionCache};
use progress_sync::{
    InMemoryRecordStore, PointEvent, Points, ProgressSync, RecordStore, StoreError, SyncConfig,
    SyncError, WalletAddress, WalletContext, WriteMode,
};

const WALLET: &str = "0xABCDEF0123456789abcdef0123456789ABCDEF01";
const CANONICAL: &str = "0xabcdef0123456789abcdef0123456789abcdef01";

fn engine_over(store: &Arc<InMemoryRecordStore>) -> (ProgressSync, Arc<InMemorySessionCache>) {
    let session = Arc::new(InMemorySessionCache::new());
    let engine = ProgressSync::new(SyncConfig::default(), store.clone(), session.clone());
    (engine, session)
}

fn blockchain_basics(points: u64) -> PointEvent {
    PointEvent::GamingHub {
        category: "blockchainBasics".into(),
        points,
    }
}

#[tokio::test(start_paused = true)]
async fn test_scenario_new_wallet_autosaves_earned_points() {
    let store = Arc::new(InMemoryRecordStore::new());
    let (engine, _) = engine_over(&store);

    let ctx = engine.connect(WALLET).await.unwrap();
    assert_eq!(ctx.address().as_str(), CANONICAL);
    let stored = store.get(CANONICAL).await.unwrap();
    assert_eq!(stored["points"]["total"], 0);

    engine.record_event(WALLET, blockchain_basics(5)).await.unwrap();
    assert_eq!(ctx.state(), SyncState::Dirty);

    // first autosave tick
    tokio::time::sleep(Duration::from_secs(31)).await;

    let stored = store.get(CANONICAL).await.unwrap();
    assert_eq!(stored["points"]["gamingHub"]["blockchainBasics"], 5);
    assert_eq!(stored["points"]["total"], 5);
    assert_eq!(ctx.state(), SyncState::Idle);
    assert_eq!(store.create_count(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_scenario_second_device_progress_is_merged_on_connect() {
    let store = Arc::new(InMemoryRecordStore::new());

    // device one earns and saves
    let (first, _) = engine_over(&store);
    first.connect(WALLET).await.unwrap();
    first.record_event(WALLET, blockchain_basics(5)).await.unwrap();
    assert_eq!(
        first.sync_now(WALLET).await.unwrap(),
        SaveOutcome::Saved { total: 5 }
    );

    // device two played offline before ever syncing
    let (second, second_session) = engine_over(&store);
    let mut offline = Points::canonical();
    offline.apply(&PointEvent::StoryChapter {
        chapter: "chapter1".into(),
        score: 10,
    });
    let address = WalletAddress::parse(WALLET).unwrap();
    session::store_points(second_session.as_ref(), &address, &offline).unwrap();

    second.connect(WALLET).await.unwrap();

    let local = second.snapshot(WALLET).await.unwrap();
    assert_eq!(local.gaming_hub["blockchainBasics"], 5);
    assert_eq!(local.story_mode.chapters["chapter1"], 10);
    assert_eq!(local.total, 15);

    let stored = store.get(CANONICAL).await.unwrap();
    assert_eq!(stored["points"]["gamingHub"]["blockchainBasics"], 5);
    assert_eq!(stored["points"]["storyMode"]["chapter1"], 10);
    assert_eq!(stored["points"]["total"], 15);
    assert_eq!(store.create_count(), 1);

    first.shutdown().await;
    second.shutdown().await;
}

fn scheduler_over(
    store: &Arc<InMemoryRecordStore>,
    policy: RetryPolicy,
) -> (Arc<SyncScheduler>, Arc<InMemorySessionCache>, Arc<WalletContext>) {
    let session = Arc::new(InMemorySessionCache::new());
    let scheduler = Arc::new(SyncScheduler::new(
        store.clone(),
        session.clone(),
        policy,
        Duration::from_secs(30),
    ));
    let ctx = Arc::new(WalletContext::new(
        WalletAddress::parse(WALLET).unwrap(),
        policy.capacity,
    ));
    ctx.transition(SyncState::Idle);
    (scheduler, session, ctx)
}

fn mirror(session: &InMemorySessionCache, ctx: &WalletContext, total: u64) {
    let mut points = Points::canonical();
    points.apply(&blockchain_basics(total));
    session::store_points(session, ctx.address(), &points).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scenario_unreachable_store_snapshot_expires_unretried() {
    let store = Arc::new(InMemoryRecordStore::new());
    let (scheduler, session, ctx) = scheduler_over(&store, RetryPolicy::default());
    mirror(&session, &ctx, 5);

    store.set_available(false);
    let outcome = scheduler.autosave(&ctx).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Queued { .. }));
    assert_eq!(ctx.queued().await, 1);

    store.set_available(true);
    let reads = store.read_count();
    let writes = store.write_attempts();
    tokio::time::advance(Duration::from_secs(6 * 60)).await;

    let report = scheduler.drain(&ctx).await;
    assert_eq!(report.dropped_stale, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 0);
    assert_eq!(store.read_count(), reads);
    assert_eq!(store.write_attempts(), writes);
    assert!(store.get(CANONICAL).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retry_queue_never_exceeds_capacity() {
    let store = Arc::new(InMemoryRecordStore::new());
    let policy = RetryPolicy {
        capacity: 5,
        ..RetryPolicy::default()
    };
    let (scheduler, session, ctx) = scheduler_over(&store, policy);
    store.set_available(false);

    for total in 1..=12 {
        mirror(&session, &ctx, total);
        scheduler.autosave(&ctx).await.unwrap();
        assert!(ctx.queued().await <= 5);
    }
    assert_eq!(ctx.queued().await, 5);
    // the oldest snapshots were evicted
    assert_eq!(ctx.queue().await.front().unwrap().points.total, 8);

    // draining delivers in order and ends on the newest snapshot
    store.set_available(true);
    let report = scheduler.drain(&ctx).await;
    assert_eq!(report.delivered, 5);
    assert_eq!(store.get(CANONICAL).await.unwrap()["points"]["total"], 12);
}

#[tokio::test]
async fn test_autosave_never_lowers_stored_leaves() {
    let store = Arc::new(InMemoryRecordStore::new());
    store
        .insert(
            CANONICAL,
            json!({"points": {"gamingHub": {"blockchainBasics": 40}, "achievements": {"firstSteps": true}}}),
        )
        .await;
    let (scheduler, session, ctx) = scheduler_over(&store, RetryPolicy::default());
    mirror(&session, &ctx, 3);

    assert_eq!(
        scheduler.autosave(&ctx).await.unwrap(),
        SaveOutcome::Saved { total: 40 }
    );
    let stored = store.get(CANONICAL).await.unwrap();
    assert_eq!(stored["points"]["gamingHub"]["blockchainBasics"], 40);
    assert_eq!(stored["points"]["achievements"]["firstSteps"], true);
}

#[tokio::test(start_paused = true)]
async fn test_hung_store_surfaces_as_timeout() {
    let store = Arc::new(InMemoryRecordStore::new().with_latency(Duration::from_secs(60)));
    let (engine, _) = engine_over(&store);

    let err = engine.connect(WALLET).await.unwrap_err();
    match err {
        SyncError::RegistrationFailed { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.connected(), 0);
    // single-flight slot released
    assert_eq!(engine.registration().in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_outage_during_session_recovers_on_drain() {
    let store = Arc::new(InMemoryRecordStore::new());
    let (engine, _) = engine_over(&store);
    let ctx = engine.connect(WALLET).await.unwrap();

    store.set_available(false);
    engine.record_event(WALLET, blockchain_basics(7)).await.unwrap();
    let outcome = engine.sync_now(WALLET).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Queued { .. }));
    assert_eq!(ctx.state(), SyncState::Queued);

    // back before the horizon; the timers deliver the save
    store.set_available(true);
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(store.get(CANONICAL).await.unwrap()["points"]["total"], 7);
    assert_eq!(ctx.queued().await, 0);
    assert_eq!(ctx.state(), SyncState::Idle);

    engine.disconnect(WALLET).await.unwrap();
    assert_eq!(ctx.state(), SyncState::Disconnected);
}

/// Store whose reads can be switched off while writes keep landing
struct ReadGate {
    inner: Arc<InMemoryRecordStore>,
    reads_down: AtomicBool,
}

#[async_trait::async_trait]
impl RecordStore for ReadGate {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read path down".into()));
        }
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, document: &Value, mode: WriteMode) -> Result<(), StoreError> {
        self.inner.write(key, document, mode).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_read_never_lowers_progress_from_another_device() {
    let inner = Arc::new(InMemoryRecordStore::new());
    inner
        .insert(
            CANONICAL,
            json!({
                "createdAt": "2024-01-01T00:00:00Z",
                "nickname": "satoshi",
                "points": {"storyMode": {"chapter1": 10}}
            }),
        )
        .await;
    let store = Arc::new(ReadGate {
        inner: inner.clone(),
        reads_down: AtomicBool::new(false),
    });
    let session = Arc::new(InMemorySessionCache::new());
    let engine = ProgressSync::new(SyncConfig::default(), store.clone(), session);
    let ctx = engine.connect(WALLET).await.unwrap();

    // another device moves ahead, then reads start failing here
    inner
        .insert(
            CANONICAL,
            json!({
                "createdAt": "2024-01-01T00:00:00Z",
                "nickname": "satoshi",
                "points": {"storyMode": {"chapter1": 20}}
            }),
        )
        .await;
    store.reads_down.store(true, Ordering::SeqCst);
    let writes = inner.write_attempts();

    engine.record_event(WALLET, blockchain_basics(5)).await.unwrap();
    let outcome = engine.sync_now(WALLET).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Queued { .. }));

    // timer ticks keep failing their reads and never write
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(inner.write_attempts(), writes);
    assert_eq!(ctx.state(), SyncState::Queued);
    assert!(ctx.queued().await >= 1);
    let stored = inner.get(CANONICAL).await.unwrap();
    assert_eq!(stored["points"]["storyMode"]["chapter1"], 20);
    assert_eq!(stored["nickname"], "satoshi");
    assert_eq!(stored["createdAt"], "2024-01-01T00:00:00Z");

    // reads recover; the queued snapshot merges over the newer record
    store.reads_down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;

    let stored = inner.get(CANONICAL).await.unwrap();
    assert_eq!(stored["points"]["storyMode"]["chapter1"], 20);
    assert_eq!(stored["points"]["gamingHub"]["blockchainBasics"], 5);
    assert_eq!(stored["points"]["total"], 25);
    assert_eq!(stored["nickname"], "satoshi");
    assert_eq!(ctx.queued().await, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_within_existence_ttl_keeps_saved_points() {
    let store = Arc::new(InMemoryRecordStore::new());
    let (engine, _) = engine_over(&store);

    engine.connect(WALLET).await.unwrap();
    engine.record_event(WALLET, blockchain_basics(5)).await.unwrap();
    assert_eq!(
        engine.sync_now(WALLET).await.unwrap(),
        SaveOutcome::Saved { total: 5 }
    );
    engine.disconnect(WALLET).await.unwrap();

    engine.connect(WALLET).await.unwrap();
    let snapshot = engine.snapshot(WALLET).await.unwrap();
    assert_eq!(snapshot.gaming_hub["blockchainBasics"], 5);
    assert_eq!(snapshot.total, 5);
    assert_eq!(store.create_count(), 1);

    engine.shutdown().await;
}
