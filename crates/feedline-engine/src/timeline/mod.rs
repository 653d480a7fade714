//! Timeline materialization state machine.
//!
//! A [`TimelineModel`] keeps a live, newest-first, deduplicated view of the
//! items its [`FilterQuery`] accepts. It backfills from storage with the query
//! text, admits live items with the predicate, and throws its buffer away and
//! refetches whenever the query changes.
//!
//! # Phases
//!
//! ```text
//! Inactive ──activate──▶ Activating ──backfill done──▶ Active
//!     ▲                                                 │  ▲
//!     └──────────────────deactivate─────────────────────┤  │ refetch done
//!                                                       ▼  │
//!                                                   Invalidated
//! any phase ──dispose──▶ Disposed
//! ```
//!
//! Every invalidation and deactivation bumps a generation counter. Fetches
//! capture the generation they started under and are discarded if it moved on.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use feedline_engine::{FilterQuery, LiveStream, MemoryStorage, TimelineModel};
//! use feedline_types::Item;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(MemoryStorage::with_items(vec![
//!     Item::new(1u64, "alice", "hello").with_media(true),
//!     Item::new(2u64, "bob", "hi").with_media(true),
//! ]));
//! let stream = Arc::new(LiveStream::new());
//!
//! let timeline = TimelineModel::builder(storage, stream)
//!     .filter_query(FilterQuery::parse(r#"author == "alice" && has_media"#)?)
//!     .build();
//! timeline.activate().await?;
//!
//! assert_eq!(timeline.items().len(), 1);
//! timeline.dispose();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use feedline_types::{
    Fetchable, Filterable, Item, ItemId, ItemStream, NotificationSink, StorageError,
    StorageResult,
};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::buffer::{BufferDelta, TimelineBuffer};
use crate::bus::{InvalidationListener, InvalidationSubscription};
use crate::config::TimelineConfig;
use crate::filter::CompiledFilter;
use crate::query::FilterQuery;

/// Errors reported by timeline operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TimelineError {
    /// The storage collaborator failed. The buffer was left untouched.
    #[error("fetch failed: {0}")]
    Fetch(#[from] StorageError),

    /// The timeline was disposed.
    #[error("timeline has been disposed")]
    Disposed,

    /// `activate` was polled outside a tokio runtime. Nothing was changed.
    #[error("timeline activation requires a tokio runtime")]
    NoRuntime,
}

/// Result type for timeline operations.
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Lifecycle phase of a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelinePhase {
    Inactive,
    /// Subscribed; the initial backfill is in flight.
    Activating,
    Active,
    /// The buffer was cleared; the refetch is in flight.
    Invalidated,
    /// Terminal.
    Disposed,
}

impl TimelinePhase {
    /// Returns true for the phases in which the timeline is subscribed.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TimelinePhase::Activating | TimelinePhase::Active | TimelinePhase::Invalidated
        )
    }
}

impl fmt::Display for TimelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimelinePhase::Inactive => "inactive",
            TimelinePhase::Activating => "activating",
            TimelinePhase::Active => "active",
            TimelinePhase::Invalidated => "invalidated",
            TimelinePhase::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Notifications published on [`TimelineModel::subscribe_events`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// One insert/evict/clear batch was applied to the buffer.
    BufferChanged(BufferDelta),

    /// A background refetch failed. The timeline stays active with whatever
    /// the buffer holds.
    RefetchFailed {
        /// Generation the refetch was started under.
        generation: u64,
        /// The storage error, rendered.
        message: String,
    },
}

/// Result of [`TimelineModel::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The results were merged into the buffer.
    Merged(BufferDelta),
    /// The timeline was invalidated or deactivated while the fetch was in
    /// flight; the results were dropped.
    Discarded,
}

/// A filter-driven, live view of feed items.
///
/// `TimelineModel` is a handle; clones refer to the same timeline. Background
/// tasks hold only weak references, so dropping the last handle tears the
/// timeline down the same way [`dispose`](TimelineModel::dispose) does.
#[derive(Clone)]
pub struct TimelineModel {
    shared: Arc<Shared>,
}

/// Builder for [`TimelineModel`].
pub struct TimelineBuilder {
    storage: Arc<dyn Fetchable>,
    stream: Arc<dyn ItemStream>,
    config: TimelineConfig,
    query: Option<FilterQuery>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl TimelineBuilder {
    /// Replaces the whole config.
    pub fn config(mut self, config: TimelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the timeline name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the initial filter query. Without one the timeline accepts nothing.
    pub fn filter_query(mut self, query: FilterQuery) -> Self {
        self.query = Some(query);
        self
    }

    /// Sets the sink informed of new arrivals when
    /// [`TimelineConfig::notify_new_arrivals`] is on.
    pub fn notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Creates the timeline, inactive and empty.
    pub fn build(self) -> TimelineModel {
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));
        let mut state = State {
            phase: TimelinePhase::Inactive,
            query: self.query,
            activated: None,
            epoch: 0,
            caught_up: None,
            subscription: None,
            compiled: Arc::new(CompiledFilter::contradiction()),
            compiled_revision: None,
            buffer: TimelineBuffer::new(self.config.max_items),
            generation: 0,
            unread: 0,
            pump: None,
            refetch: None,
            runtime: None,
        };
        state.recompile();

        let shared = Arc::new_cyclic(|weak_self| Shared {
            config: self.config,
            storage: self.storage,
            stream: self.stream,
            sink: self.sink,
            events,
            state: Mutex::new(state),
            weak_self: weak_self.clone(),
        });
        TimelineModel { shared }
    }
}

struct Shared {
    config: TimelineConfig,
    storage: Arc<dyn Fetchable>,
    stream: Arc<dyn ItemStream>,
    sink: Option<Arc<dyn NotificationSink>>,
    events: broadcast::Sender<TimelineEvent>,
    state: Mutex<State>,
    weak_self: Weak<Shared>,
}

struct State {
    phase: TimelinePhase,
    query: Option<FilterQuery>,
    /// The query this timeline holds an activation count on.
    activated: Option<FilterQuery>,
    /// Bumped whenever the attached query may no longer be wanted. An
    /// attachment started under an older epoch backs out.
    epoch: u64,
    /// Revision a live item already applied after noticing the change ahead of
    /// its notification. Signals up to this revision are then redundant.
    caught_up: Option<u64>,
    subscription: Option<InvalidationSubscription>,
    compiled: Arc<CompiledFilter>,
    /// Query revision `compiled` was built from; `None` without a query.
    compiled_revision: Option<u64>,
    buffer: TimelineBuffer,
    generation: u64,
    /// Live items inserted since the host last took the count.
    unread: usize,
    /// Forwards live items into the timeline.
    pump: Option<JoinHandle<()>>,
    /// In-flight background refetch.
    refetch: Option<JoinHandle<()>>,
    runtime: Option<Handle>,
}

impl State {
    /// Recompiles from the current query.
    fn recompile(&mut self) {
        match &self.query {
            Some(query) => {
                let (compiled, revision) = query.compiled_with_revision();
                self.compiled = compiled;
                self.compiled_revision = Some(revision);
            }
            None => {
                self.compiled = Arc::new(CompiledFilter::contradiction());
                self.compiled_revision = None;
            }
        }
    }

    /// Returns true if the query changed since the last compile.
    fn is_stale(&self) -> bool {
        self.query.as_ref().map(FilterQuery::revision) != self.compiled_revision
    }

    /// The filter for the query as it is now, even if not yet applied.
    fn current_filter(&self) -> Arc<CompiledFilter> {
        match &self.query {
            Some(query) if self.is_stale() => query.compiled(),
            _ => Arc::clone(&self.compiled),
        }
    }

    /// Stops background work and unsubscribes. Returns the query to deactivate
    /// once the lock is released.
    fn teardown(&mut self) -> Option<FilterQuery> {
        self.generation += 1;
        self.epoch += 1;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(refetch) = self.refetch.take() {
            refetch.abort();
        }
        self.subscription = None;
        self.phase = TimelinePhase::Inactive;
        self.activated.take()
    }
}

impl TimelineModel {
    /// Starts building a timeline over the given collaborators.
    pub fn builder(storage: Arc<dyn Fetchable>, stream: Arc<dyn ItemStream>) -> TimelineBuilder {
        TimelineBuilder {
            storage,
            stream,
            config: TimelineConfig::default(),
            query: None,
            sink: None,
        }
    }

    /// The timeline's name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// The timeline's settings.
    pub fn config(&self) -> &TimelineConfig {
        &self.shared.config
    }

    /// Subscribes to the live stream and the query, then backfills.
    ///
    /// Calling this while already active is a no-op. If the query changed
    /// while the timeline was inactive, the retained buffer is cleared first.
    /// Activating the query notifies the other timelines that share it.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::Fetch`] if the backfill fails; the timeline is
    /// rolled back to inactive with its buffer untouched. Returns
    /// [`TimelineError::Disposed`] after [`dispose`](Self::dispose) and
    /// [`TimelineError::NoRuntime`] outside a tokio runtime.
    pub async fn activate(&self) -> Result<()> {
        let shared = &self.shared;
        let (generation, attach) = {
            let mut state = shared.state.lock();
            match state.phase {
                TimelinePhase::Disposed => return Err(TimelineError::Disposed),
                TimelinePhase::Inactive => {}
                _ => return Ok(()),
            }
            let runtime = Handle::try_current().map_err(|_| TimelineError::NoRuntime)?;

            state.phase = TimelinePhase::Activating;
            state.generation += 1;

            let receiver = shared.stream.subscribe();
            state.pump = Some(runtime.spawn(run_pump(shared.weak_self.clone(), receiver)));
            state.runtime = Some(runtime);
            (state.generation, state.query.clone().map(|query| (query, state.epoch)))
        };

        let (query_text, cleared) = {
            let mut state = match attach {
                Some((query, epoch)) => match shared.attach(query, epoch) {
                    Some(state) => state,
                    None => return Ok(()),
                },
                None => shared.state.lock(),
            };
            if state.generation != generation {
                return Ok(());
            }
            let cleared = if state.is_stale() {
                state.recompile();
                state.unread = 0;
                state.buffer.clear()
            } else {
                BufferDelta::default()
            };
            (state.compiled.query_text().to_string(), cleared)
        };

        shared.emit(cleared);
        tracing::debug!(timeline = %shared.config.name, generation, "activating");

        let result = shared
            .storage
            .fetch(&query_text, None, Some(shared.config.backfill_count))
            .await;

        let mut state = shared.state.lock();
        if state.generation != generation {
            tracing::debug!(
                timeline = %shared.config.name,
                generation,
                current = state.generation,
                "discarding stale backfill"
            );
            return Ok(());
        }
        match result {
            Ok(items) => {
                let delta = state.buffer.merge(items);
                state.phase = TimelinePhase::Active;
                drop(state);
                shared.emit(delta);
                tracing::debug!(timeline = %shared.config.name, generation, "active");
                Ok(())
            }
            Err(err) => {
                tracing::debug!(timeline = %shared.config.name, error = %err, "backfill failed, rolling back");
                let query = state.teardown();
                drop(state);
                if let Some(query) = query {
                    query.deactivate();
                }
                Err(err.into())
            }
        }
    }

    /// Unsubscribes from the live stream and the query. The buffer is kept so
    /// reactivation is cheap. In-flight fetches become stale.
    pub fn deactivate(&self) {
        self.shared.deactivate();
    }

    /// Activates or deactivates. Setting the current value is a no-op.
    ///
    /// # Errors
    ///
    /// See [`activate`](Self::activate).
    pub async fn set_active(&self, active: bool) -> Result<()> {
        if active {
            self.activate().await
        } else {
            self.deactivate();
            Ok(())
        }
    }

    /// Clears the buffer, recompiles and, when active, refetches in the
    /// background.
    ///
    /// Called automatically when the query changes. Invalidations arriving
    /// while a refetch is in flight replace it rather than queueing behind it.
    pub fn invalidate(&self) {
        self.shared.invalidate();
    }

    /// Swaps the filter query, then invalidates.
    ///
    /// The old query is unsubscribed before the new one is subscribed, and no
    /// item is evaluated against the old predicate after the swap. Passing the
    /// query already in use is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::Disposed`] after [`dispose`](Self::dispose).
    pub fn set_filter_query(&self, query: Option<FilterQuery>) -> Result<()> {
        let shared = &self.shared;
        let (delta, old, attach) = {
            let mut state = shared.state.lock();
            if state.phase == TimelinePhase::Disposed {
                return Err(TimelineError::Disposed);
            }
            let unchanged = match (&state.query, &query) {
                (Some(current), Some(next)) => current.ptr_eq(next),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return Ok(());
            }

            // Unsubscribe from the old query before touching the new one.
            state.subscription = None;
            let old = state.activated.take();
            state.query = query;
            state.epoch += 1;
            let attach = if state.phase.is_active() {
                state.query.clone().map(|query| (query, state.epoch))
            } else {
                None
            };
            (shared.invalidate_locked(&mut state), old, attach)
        };

        tracing::debug!(timeline = %shared.config.name, "filter query replaced");
        shared.emit(delta);
        if let Some(old) = old {
            old.deactivate();
        }
        if let Some((query, epoch)) = attach {
            if let Some(mut state) = shared.attach(query, epoch) {
                // The new query may have changed before the subscription existed.
                if state.is_stale() {
                    let delta = shared.invalidate_locked(&mut state);
                    drop(state);
                    shared.emit(delta);
                }
            }
        }
        Ok(())
    }

    /// Offers a live item to the timeline.
    ///
    /// Returns true if the predicate accepted it. Items are only observed while
    /// the timeline is active.
    pub fn on_item_arrived(&self, item: Item) -> bool {
        self.shared.on_item_arrived(item)
    }

    /// Fetches up to `count` items older than `before` (or the newest ones)
    /// with the current query text and merges them.
    ///
    /// # Errors
    ///
    /// Storage errors are returned as-is and never retried; the buffer is left
    /// untouched.
    pub async fn fetch(&self, before: Option<ItemId>, count: usize) -> Result<FetchOutcome> {
        let shared = &self.shared;
        let (generation, query_text) = {
            let state = shared.state.lock();
            if state.phase == TimelinePhase::Disposed {
                return Err(TimelineError::Disposed);
            }
            (state.generation, state.compiled.query_text().to_string())
        };

        let items = shared.storage.fetch(&query_text, before, Some(count)).await?;

        let mut state = shared.state.lock();
        if state.generation != generation {
            tracing::debug!(
                timeline = %shared.config.name,
                generation,
                current = state.generation,
                "discarding stale fetch"
            );
            return Ok(FetchOutcome::Discarded);
        }
        let delta = state.buffer.merge(items);
        drop(state);
        shared.emit(delta.clone());
        Ok(FetchOutcome::Merged(delta))
    }

    /// Deactivates and releases the query and the buffer. Idempotent.
    pub fn dispose(&self) {
        let shared = &self.shared;
        let (query, delta) = {
            let mut state = shared.state.lock();
            if state.phase == TimelinePhase::Disposed {
                return;
            }
            let query = state.teardown();
            state.phase = TimelinePhase::Disposed;
            state.query = None;
            state.runtime = None;
            state.compiled = Arc::new(CompiledFilter::contradiction());
            state.compiled_revision = None;
            state.unread = 0;
            (query, state.buffer.clear())
        };
        if let Some(query) = query {
            query.deactivate();
        }
        shared.emit(delta);
        tracing::debug!(timeline = %shared.config.name, "disposed");
    }

    /// The buffered items, newest first.
    pub fn items(&self) -> Vec<Item> {
        self.shared.state.lock().buffer.items()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().buffer.is_empty()
    }

    pub fn phase(&self) -> TimelinePhase {
        self.shared.state.lock().phase
    }

    /// Returns true while subscribed (activating, active or invalidated).
    pub fn is_active(&self) -> bool {
        self.phase().is_active()
    }

    /// Current generation; bumped on every invalidation and deactivation.
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// The query in use, if any.
    pub fn filter_query(&self) -> Option<FilterQuery> {
        self.shared.state.lock().query.clone()
    }

    /// The filter currently applied to live items.
    pub fn compiled_filter(&self) -> Arc<CompiledFilter> {
        self.shared.state.lock().current_filter()
    }

    /// Live items inserted since the count was last taken. Stays zero unless
    /// [`TimelineConfig::count_unread`] is on.
    pub fn unread_count(&self) -> usize {
        self.shared.state.lock().unread
    }

    /// Returns the unread count and resets it to zero.
    pub fn take_unread(&self) -> usize {
        std::mem::take(&mut self.shared.state.lock().unread)
    }

    /// Subscribes to buffer and refetch events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<TimelineEvent> {
        self.shared.events.subscribe()
    }
}

impl Filterable for TimelineModel {
    fn accepts(&self, item: &Item) -> bool {
        self.shared.state.lock().current_filter().accepts(item)
    }
}

impl fmt::Debug for TimelineModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TimelineModel")
            .field("name", &self.shared.config.name)
            .field("phase", &state.phase)
            .field("generation", &state.generation)
            .field("items", &state.buffer.len())
            .finish()
    }
}

impl Shared {
    fn listener(&self) -> Weak<dyn InvalidationListener> {
        self.weak_self.clone()
    }

    /// Activates `query` with the model lock released, since the activation
    /// notifies every timeline sharing the query. Then subscribes, unless the
    /// timeline was deactivated or given another query in the meantime.
    fn attach(&self, query: FilterQuery, epoch: u64) -> Option<MutexGuard<'_, State>> {
        query.activate();
        let mut state = self.state.lock();
        if state.epoch != epoch {
            drop(state);
            query.deactivate();
            return None;
        }
        state.subscription = Some(query.subscribe(self.listener()));
        state.activated = Some(query);
        Some(state)
    }

    fn emit(&self, delta: BufferDelta) {
        if !delta.is_empty() {
            // No subscribers is fine.
            let _ = self.events.send(TimelineEvent::BufferChanged(delta));
        }
    }

    fn deactivate(&self) {
        let query = {
            let mut state = self.state.lock();
            if !state.phase.is_active() {
                return;
            }
            state.teardown()
        };
        if let Some(query) = query {
            query.deactivate();
        }
        tracing::debug!(timeline = %self.config.name, "deactivated");
    }

    fn invalidate(&self) {
        let delta = {
            let mut state = self.state.lock();
            if state.phase == TimelinePhase::Disposed {
                return;
            }
            self.invalidate_locked(&mut state)
        };
        self.emit(delta);
    }

    /// Bumps the generation, clears, recompiles and starts a refetch if active.
    fn invalidate_locked(&self, state: &mut State) -> BufferDelta {
        state.generation += 1;
        state.caught_up = None;
        state.unread = 0;
        if let Some(refetch) = state.refetch.take() {
            refetch.abort();
        }
        let delta = state.buffer.clear();
        state.recompile();

        if state.phase.is_active() {
            state.phase = TimelinePhase::Invalidated;
            self.start_refetch(state);
        }
        tracing::debug!(
            timeline = %self.config.name,
            generation = state.generation,
            query = state.compiled.query_text(),
            "invalidated"
        );
        delta
    }

    /// Spawns a backfill under the current generation, replacing any refetch
    /// already in flight.
    fn start_refetch(&self, state: &mut State) {
        let Some(runtime) = &state.runtime else {
            return;
        };
        if let Some(previous) = state.refetch.take() {
            previous.abort();
        }
        state.refetch = Some(runtime.spawn(run_refetch(
            self.weak_self.clone(),
            state.generation,
            state.compiled.query_text().to_string(),
            self.config.backfill_count,
        )));
    }

    fn complete_refetch(&self, generation: u64, result: StorageResult<Vec<Item>>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::debug!(
                timeline = %self.config.name,
                generation,
                current = state.generation,
                "discarding stale refetch"
            );
            return;
        }
        state.refetch = None;
        if state.phase == TimelinePhase::Invalidated {
            state.phase = TimelinePhase::Active;
        }
        match result {
            Ok(items) => {
                let delta = state.buffer.merge(items);
                drop(state);
                self.emit(delta);
            }
            Err(err) => {
                drop(state);
                tracing::warn!(timeline = %self.config.name, generation, error = %err, "refetch failed");
                let _ = self.events.send(TimelineEvent::RefetchFailed {
                    generation,
                    message: err.to_string(),
                });
            }
        }
    }

    /// Recovers items a lagging stream receiver skipped, without clearing.
    fn recover_lag(&self, skipped: u64) {
        tracing::warn!(timeline = %self.config.name, skipped, "live stream lagged, backfilling");
        let mut state = self.state.lock();
        if state.phase.is_active() {
            self.start_refetch(&mut state);
        }
    }

    fn on_item_arrived(&self, item: Item) -> bool {
        let (cleared, delta, newly_inserted) = {
            let mut state = self.state.lock();
            if !state.phase.is_active() {
                return false;
            }
            // The query changed but its notification has not reached us yet.
            let cleared = if state.is_stale() {
                let cleared = self.invalidate_locked(&mut state);
                state.caught_up = state.compiled_revision;
                cleared
            } else {
                BufferDelta::default()
            };
            if !state.compiled.accepts(&item) {
                drop(state);
                self.emit(cleared);
                tracing::trace!(timeline = %self.config.name, id = %item.id, "item rejected");
                return false;
            }
            let delta = state.buffer.insert(item.clone());
            let newly_inserted = delta.inserted.contains(&item.id);
            if newly_inserted && self.config.count_unread {
                state.unread += 1;
            }
            (cleared, delta, newly_inserted)
        };

        self.emit(cleared);
        self.emit(delta);
        if newly_inserted && self.config.notify_new_arrivals {
            if let Some(sink) = &self.sink {
                sink.notify_new_arrival(&self.config.name, &item);
            }
        }
        true
    }
}

impl InvalidationListener for Shared {
    fn on_invalidated(&self, revision: u64) {
        let delta = {
            let mut state = self.state.lock();
            if state.phase == TimelinePhase::Disposed {
                return;
            }
            // A live item already applied this revision; clearing now would
            // drop what it admitted.
            if let Some(caught_up) = state.caught_up {
                if revision <= caught_up && !state.is_stale() {
                    if revision == caught_up {
                        state.caught_up = None;
                    }
                    return;
                }
            }
            self.invalidate_locked(&mut state)
        };
        self.emit(delta);
    }
}
impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(query) = state.teardown() {
            query.deactivate();
        }
    }
}

/// Forwards live items until the stream closes or the timeline goes away.
async fn run_pump(timeline: Weak<Shared>, mut receiver: broadcast::Receiver<Item>) {
    loop {
        let received = receiver.recv().await;
        let Some(shared) = timeline.upgrade() else {
            break;
        };
        match received {
            Ok(item) => {
                shared.on_item_arrived(item);
            }
            Err(RecvError::Lagged(skipped)) => shared.recover_lag(skipped),
            Err(RecvError::Closed) => {
                tracing::debug!(timeline = %shared.config.name, "live stream closed");
                break;
            }
        }
    }
}

async fn run_refetch(timeline: Weak<Shared>, generation: u64, query_text: String, limit: usize) {
    let Some(storage) = timeline.upgrade().map(|shared| Arc::clone(&shared.storage)) else {
        return;
    };
    let result = storage.fetch(&query_text, None, Some(limit)).await;
    if let Some(shared) = timeline.upgrade() {
        shared.complete_refetch(generation, result);
    }
}
