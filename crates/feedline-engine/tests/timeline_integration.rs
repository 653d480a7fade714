//! Integration tests for TimelineModel.
//!
//! These tests drive timelines through the in-memory storage and the broadcast
//! live stream, so live items go through the real stream pump.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedline_engine::{
    FetchOutcome, FilterExpression, FilterQuery, LiveStream, MemoryStorage, TimelineConfig,
    TimelineEvent, TimelineModel, TimelinePhase,
};
use feedline_types::{Fetchable, Item, ItemId, NotificationSink, StorageError, StorageResult};
use tokio::sync::Semaphore;

fn make_item(id: u64, author: &str, has_media: bool) -> Item {
    Item::new(id, author, format!("item {id}")).with_media(has_media)
}

fn ids(timeline: &TimelineModel) -> Vec<u64> {
    timeline.items().iter().map(|i| i.id.0).collect()
}

/// Polls `condition` until it holds or a second has passed.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Default)]
struct CountingSink {
    count: AtomicUsize,
}

impl NotificationSink for CountingSink {
    fn notify_new_arrival(&self, _timeline: &str, _item: &Item) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Storage that holds every fetch until a permit is released.
struct GatedStorage {
    inner: MemoryStorage,
    gate: Semaphore,
    started: AtomicUsize,
}

impl GatedStorage {
    fn new(items: Vec<Item>) -> Self {
        Self {
            inner: MemoryStorage::with_items(items),
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        }
    }

    fn release_one(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Fetchable for GatedStorage {
    async fn fetch(
        &self,
        query_text: &str,
        before: Option<ItemId>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Item>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| StorageError::unavailable("gate closed"))?;
        permit.forget();
        self.inner.query(query_text, before, limit)
    }
}

// ==================== Scenarios ====================

#[tokio::test]
async fn test_alice_with_media_scenario() {
    let storage = Arc::new(MemoryStorage::new());
    let stream = Arc::new(LiveStream::new());
    let timeline = TimelineModel::builder(storage, stream.clone())
        .filter_query(FilterQuery::parse(r#"author == "alice" AND has_media"#).unwrap())
        .build();
    timeline.activate().await.unwrap();

    stream.publish(make_item(1, "alice", true));
    stream.publish(make_item(2, "alice", false));
    stream.publish(make_item(3, "bob", true));
    stream.publish(make_item(4, "alice", true));

    // Items are pumped in order, so item 4 landing means the rest were seen.
    wait_until(|| ids(&timeline).contains(&4)).await;
    assert_eq!(ids(&timeline), vec![4, 1]);
}

#[tokio::test]
async fn test_swapped_query_no_longer_triggers_refetch() {
    let storage = Arc::new(MemoryStorage::with_items(vec![
        make_item(1, "alice", false),
        make_item(2, "bob", false),
    ]));
    let q1 = FilterQuery::parse(r#"author == "alice""#).unwrap();
    let q2 = FilterQuery::parse(r#"author == "bob""#).unwrap();
    let timeline = TimelineModel::builder(storage.clone(), Arc::new(LiveStream::new()))
        .filter_query(q1.clone())
        .build();
    timeline.activate().await.unwrap();
    assert_eq!(q1.listener_count(), 1);

    timeline.set_filter_query(Some(q2.clone())).unwrap();
    wait_until(|| timeline.phase() == TimelinePhase::Active).await;
    assert_eq!(ids(&timeline), vec![2]);
    assert_eq!(q1.listener_count(), 0);
    assert!(!q1.is_active());
    assert_eq!(q2.listener_count(), 1);

    let calls = storage.calls();
    let generation = timeline.generation();
    q1.set_expression(FilterExpression::Literal(true));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(storage.calls(), calls);
    assert_eq!(timeline.generation(), generation);
    assert_eq!(ids(&timeline), vec![2]);
}

#[tokio::test]
async fn test_query_change_refetches_with_new_text() {
    let storage = Arc::new(MemoryStorage::with_items(vec![
        make_item(1, "alice", false),
        make_item(2, "bob", false),
    ]));
    let query = FilterQuery::parse(r#"author == "alice""#).unwrap();
    let timeline = TimelineModel::builder(storage.clone(), Arc::new(LiveStream::new()))
        .filter_query(query.clone())
        .build();
    timeline.activate().await.unwrap();
    let mut events = timeline.subscribe_events();

    query.set_source(r#"author == "bob""#).unwrap();

    assert!(timeline.is_empty());
    wait_until(|| ids(&timeline) == vec![2]).await;
    assert_eq!(storage.last_query().as_deref(), Some("(author = 'bob')"));
    assert_eq!(query.compilations(), 2);

    // One clear batch followed by one merge batch.
    let first = events.recv().await.unwrap();
    assert!(matches!(first, TimelineEvent::BufferChanged(ref d) if d.cleared));
    let second = events.recv().await.unwrap();
    assert!(matches!(second, TimelineEvent::BufferChanged(ref d) if d.inserted == vec![ItemId(2)]));
}

#[tokio::test]
async fn test_deactivate_then_activate_keeps_buffer_and_backfills() {
    let storage = Arc::new(MemoryStorage::with_items(vec![make_item(1, "alice", false)]));
    let stream = Arc::new(LiveStream::new());
    let timeline = TimelineModel::builder(storage.clone(), stream.clone())
        .filter_query(FilterQuery::parse(r#"author == "alice""#).unwrap())
        .build();
    timeline.activate().await.unwrap();
    stream.publish(make_item(5, "alice", false));
    wait_until(|| timeline.len() == 2).await;

    timeline.deactivate();
    wait_until(|| stream.subscriber_count() == 0).await;
    storage.insert(make_item(3, "alice", false));
    assert_eq!(ids(&timeline), vec![5, 1]);

    let calls = storage.calls();
    timeline.activate().await.unwrap();

    assert_eq!(storage.calls(), calls + 1);
    assert_eq!(ids(&timeline), vec![5, 3, 1]);
}

#[tokio::test]
async fn test_idempotent_activation_single_delivery() {
    let stream = Arc::new(LiveStream::new());
    let sink = Arc::new(CountingSink::default());
    let timeline = TimelineModel::builder(Arc::new(MemoryStorage::new()), stream.clone())
        .config(TimelineConfig {
            notify_new_arrivals: true,
            ..TimelineConfig::named("home")
        })
        .filter_query(FilterQuery::parse("true").unwrap())
        .notification_sink(sink.clone())
        .build();

    timeline.set_active(true).await.unwrap();
    timeline.set_active(true).await.unwrap();
    assert_eq!(stream.subscriber_count(), 1);

    stream.publish(make_item(1, "carol", false));
    wait_until(|| timeline.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(sink.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stale_backfill_is_discarded() {
    let storage = Arc::new(GatedStorage::new(vec![
        make_item(1, "alice", false),
        make_item(2, "bob", false),
    ]));
    let timeline = TimelineModel::builder(storage.clone(), Arc::new(LiveStream::new()))
        .filter_query(FilterQuery::parse(r#"author == "alice""#).unwrap())
        .build();

    let activating = {
        let timeline = timeline.clone();
        tokio::spawn(async move { timeline.activate().await })
    };
    wait_until(|| storage.started.load(Ordering::SeqCst) == 1).await;
    assert_eq!(timeline.phase(), TimelinePhase::Activating);

    // The filter changes while the backfill is in flight.
    timeline
        .set_filter_query(Some(FilterQuery::parse(r#"author == "bob""#).unwrap()))
        .unwrap();
    wait_until(|| storage.started.load(Ordering::SeqCst) == 2).await;

    // The old backfill completes first and must not touch the buffer.
    storage.release_one();
    activating.await.unwrap().unwrap();
    assert!(timeline.is_empty());
    assert_eq!(timeline.phase(), TimelinePhase::Invalidated);

    storage.release_one();
    wait_until(|| timeline.phase() == TimelinePhase::Active).await;
    assert_eq!(ids(&timeline), vec![2]);
}

#[tokio::test]
async fn test_stale_fetch_reports_discarded() {
    let storage = Arc::new(GatedStorage::new(vec![make_item(1, "alice", false)]));
    let timeline = TimelineModel::builder(storage.clone(), Arc::new(LiveStream::new()))
        .filter_query(FilterQuery::parse(r#"author == "alice""#).unwrap())
        .build();

    let fetching = {
        let timeline = timeline.clone();
        tokio::spawn(async move { timeline.fetch(None, 10).await })
    };
    wait_until(|| storage.started.load(Ordering::SeqCst) == 1).await;

    timeline.invalidate();
    storage.release_one();

    let outcome = fetching.await.unwrap().unwrap();
    assert_eq!(outcome, FetchOutcome::Discarded);
    assert!(timeline.is_empty());
}

#[tokio::test]
async fn test_dispose_releases_everything() {
    let stream = Arc::new(LiveStream::new());
    let query = FilterQuery::parse("true").unwrap();
    let timeline = TimelineModel::builder(Arc::new(MemoryStorage::new()), stream.clone())
        .filter_query(query.clone())
        .build();
    timeline.activate().await.unwrap();
    assert_eq!(stream.subscriber_count(), 1);

    timeline.dispose();
    timeline.dispose();

    wait_until(|| stream.subscriber_count() == 0).await;
    assert_eq!(query.listener_count(), 0);
    assert!(!query.is_active());
    assert_eq!(timeline.phase(), TimelinePhase::Disposed);
}

#[tokio::test]
async fn test_shared_query_drives_two_timelines() {
    let storage = Arc::new(MemoryStorage::with_items(vec![
        make_item(1, "alice", false),
        make_item(2, "bob", false),
    ]));
    let query = FilterQuery::parse(r#"author == "alice""#).unwrap();
    let home = TimelineModel::builder(storage.clone(), Arc::new(LiveStream::new()))
        .name("home")
        .filter_query(query.clone())
        .build();
    let side = TimelineModel::builder(storage.clone(), Arc::new(LiveStream::new()))
        .name("side")
        .filter_query(query.clone())
        .build();
    home.activate().await.unwrap();
    side.activate().await.unwrap();
    assert_eq!(query.listener_count(), 2);

    query.set_source(r#"author == "bob""#).unwrap();

    wait_until(|| ids(&home) == vec![2] && ids(&side) == vec![2]).await;
    // Compiled once for both timelines.
    assert_eq!(query.compilations(), 2);
}

/// Storage that fails every fetch after the first.
struct FailAfterFirst {
    inner: MemoryStorage,
    calls: AtomicUsize,
}

#[async_trait]
impl Fetchable for FailAfterFirst {
    async fn fetch(
        &self,
        query_text: &str,
        before: Option<ItemId>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Item>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(StorageError::unavailable("connection reset"));
        }
        self.inner.query(query_text, before, limit)
    }
}

#[tokio::test]
async fn test_refetch_failure_is_reported_as_event() {
    let storage = Arc::new(FailAfterFirst {
        inner: MemoryStorage::with_items(vec![make_item(1, "alice", false)]),
        calls: AtomicUsize::new(0),
    });
    let timeline = TimelineModel::builder(storage, Arc::new(LiveStream::new()))
        .filter_query(FilterQuery::parse("true").unwrap())
        .build();
    timeline.activate().await.unwrap();
    let mut events = timeline.subscribe_events();

    timeline.invalidate();

    let mut failure = None;
    for _ in 0..2 {
        if let TimelineEvent::RefetchFailed { message, .. } = events.recv().await.unwrap() {
            failure = Some(message);
            break;
        }
    }
    assert_eq!(
        failure.as_deref(),
        Some("storage unavailable: connection reset")
    );
    assert_eq!(timeline.phase(), TimelinePhase::Active);
    assert!(timeline.is_empty());
}
