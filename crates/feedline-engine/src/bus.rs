//! Invalidation signal plumbing between filter queries and timelines.
//!
//! A [`ListenerRegistry`] holds weak references to its listeners, so a filter
//! query never keeps a timeline alive. Subscribers own an
//! [`InvalidationSubscription`] guard; dropping the guard unsubscribes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Identifier of one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receives invalidation signals.
pub trait InvalidationListener: Send + Sync {
    /// Called after the source changed. `revision` is the source's revision at
    /// the time the notification round started.
    fn on_invalidated(&self, revision: u64);
}

#[derive(Default)]
struct NotifyState {
    /// A notification round is running.
    notifying: bool,
    /// Highest revision requested by changes made during the running round.
    pending: Option<u64>,
}

/// An observer registry of weakly-held invalidation listeners.
pub struct ListenerRegistry {
    listeners: Mutex<Vec<(SubscriptionId, Weak<dyn InvalidationListener>)>>,
    next_id: AtomicU64,
    state: Mutex<NotifyState>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            state: Mutex::new(NotifyState::default()),
        }
    }

    /// Registers a listener. The returned guard unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: Weak<dyn InvalidationListener>,
    ) -> InvalidationSubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        tracing::debug!(subscription = %id, "invalidation listener registered");
        InvalidationSubscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sub, _)| *sub != id);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!(subscription = %id, "invalidation listener removed");
        }
        removed
    }

    /// Number of registered listeners whose target is still alive.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|(_, listener)| listener.strong_count() > 0)
            .count()
    }

    /// Returns true if no live listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fires the signal to every live listener.
    ///
    /// Listeners run without any registry lock held, so they may subscribe,
    /// unsubscribe or trigger another change. A change triggered from inside a
    /// listener does not recurse: it is folded into one more round that starts
    /// after the current one finishes.
    pub fn notify(&self, revision: u64) {
        {
            let mut state = self.state.lock();
            if state.notifying {
                state.pending = Some(state.pending.map_or(revision, |p| p.max(revision)));
                return;
            }
            state.notifying = true;
        }
        let _reset = ResetOnDrop(&self.state);

        let mut revision = revision;
        loop {
            for listener in self.snapshot() {
                listener.on_invalidated(revision);
            }

            let mut state = self.state.lock();
            match state.pending.take() {
                Some(next) => revision = next,
                None => {
                    // Cleared under the same lock that saw no pending change,
                    // so a concurrent notify either queued before this point
                    // or starts its own round after it.
                    state.notifying = false;
                    break;
                }
            }
        }
    }

    /// Upgrades live listeners and prunes dead ones.
    fn snapshot(&self) -> Vec<Arc<dyn InvalidationListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|(_, listener)| listener.strong_count() > 0);
        listeners
            .iter()
            .filter_map(|(_, listener)| listener.upgrade())
            .collect()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

/// Clears the `notifying` flag when a listener panics mid-round.
struct ResetOnDrop<'a>(&'a Mutex<NotifyState>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.0.lock();
            state.notifying = false;
            state.pending = None;
        }
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct InvalidationSubscription {
    id: SubscriptionId,
    registry: Weak<ListenerRegistry>,
}

impl InvalidationSubscription {
    /// The subscription's identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl fmt::Debug for InvalidationSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationSubscription")
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for InvalidationSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
        last: AtomicU64,
    }

    impl InvalidationListener for Counter {
        fn on_invalidated(&self, revision: u64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last.store(revision, Ordering::SeqCst);
        }
    }

    fn weak(listener: &Arc<Counter>) -> Weak<dyn InvalidationListener> {
        let listener: Arc<dyn InvalidationListener> = listener.clone();
        Arc::downgrade(&listener)
    }

    #[test]
    fn test_notify_reaches_every_listener_once() {
        let registry = Arc::new(ListenerRegistry::new());
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let _sa = registry.subscribe(weak(&a));
        let _sb = registry.subscribe(weak(&b));

        registry.notify(7);

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.last.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_dropping_guard_unsubscribes() {
        let registry = Arc::new(ListenerRegistry::new());
        let a = Arc::new(Counter::default());
        let sub = registry.subscribe(weak(&a));
        assert_eq!(registry.len(), 1);

        drop(sub);
        registry.notify(1);

        assert!(registry.is_empty());
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_registry_does_not_keep_listener_alive() {
        let registry = Arc::new(ListenerRegistry::new());
        let a = Arc::new(Counter::default());
        let _sub = registry.subscribe(weak(&a));
        let weak_a = Arc::downgrade(&a);

        drop(a);

        assert!(weak_a.upgrade().is_none());
        assert_eq!(registry.len(), 0);
        registry.notify(1);
    }

    #[test]
    fn test_guard_outliving_registry_is_harmless() {
        let registry = Arc::new(ListenerRegistry::new());
        let a = Arc::new(Counter::default());
        let sub = registry.subscribe(weak(&a));
        drop(registry);
        drop(sub);
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let registry = Arc::new(ListenerRegistry::new());
        let a = Arc::new(Counter::default());
        let s1 = registry.subscribe(weak(&a));
        let s2 = registry.subscribe(weak(&a));
        assert_ne!(s1.id(), s2.id());
        assert!(registry.unsubscribe(s1.id()));
        assert!(!registry.unsubscribe(s1.id()));
    }

    /// Re-fires the registry from inside its own callback a fixed number of times.
    struct Reentrant {
        registry: Arc<ListenerRegistry>,
        calls: AtomicUsize,
        refires: AtomicUsize,
    }

    impl InvalidationListener for Reentrant {
        fn on_invalidated(&self, revision: u64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refires.load(Ordering::SeqCst) > 0 {
                self.refires.fetch_sub(1, Ordering::SeqCst);
                // Two nested changes coalesce into a single extra round.
                self.registry.notify(revision + 1);
                self.registry.notify(revision + 2);
            }
        }
    }

    #[test]
    fn test_reentrant_notify_is_coalesced() {
        let registry = Arc::new(ListenerRegistry::new());
        let listener = Arc::new(Reentrant {
            registry: registry.clone(),
            calls: AtomicUsize::new(0),
            refires: AtomicUsize::new(1),
        });
        let as_dyn: Arc<dyn InvalidationListener> = listener.clone();
        let _sub = registry.subscribe(Arc::downgrade(&as_dyn));

        registry.notify(1);

        // One original round plus one coalesced round.
        assert_eq!(listener.calls.load(Ordering::SeqCst), 2);

        // The guard was reset; a later change notifies again.
        registry.notify(10);
        assert_eq!(listener.calls.load(Ordering::SeqCst), 3);
    }

    /// Records the highest revision it has seen.
    #[derive(Default)]
    struct Highest {
        seen: AtomicU64,
    }

    impl InvalidationListener for Highest {
        fn on_invalidated(&self, revision: u64) {
            self.seen.fetch_max(revision, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_concurrent_notify_delivers_latest_revision() {
        for _ in 0..50 {
            let registry = Arc::new(ListenerRegistry::new());
            let listener = Arc::new(Highest::default());
            let as_dyn: Arc<dyn InvalidationListener> = listener.clone();
            let _sub = registry.subscribe(Arc::downgrade(&as_dyn));

            let handles: Vec<_> = (0..4u64)
                .map(|thread| {
                    let registry = registry.clone();
                    std::thread::spawn(move || {
                        for step in 0..100u64 {
                            registry.notify(step * 4 + thread + 1);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            // Every change either ran its own round or was folded into one.
            assert_eq!(listener.seen.load(Ordering::SeqCst), 400);
            assert!(!registry.state.lock().notifying);
            assert!(registry.state.lock().pending.is_none());
        }
    }

    #[test]
    fn test_pending_change_queued_during_round_is_delivered() {
        let registry = Arc::new(ListenerRegistry::new());
        let listener = Arc::new(Highest::default());
        let as_dyn: Arc<dyn InvalidationListener> = listener.clone();
        let _sub = registry.subscribe(Arc::downgrade(&as_dyn));

        // Queue a change as another thread would while a round is running.
        registry.state.lock().notifying = true;
        registry.notify(5);
        assert_eq!(listener.seen.load(Ordering::SeqCst), 0);
        assert_eq!(registry.state.lock().pending, Some(5));
        registry.state.lock().notifying = false;

        registry.notify(6);
        assert_eq!(listener.seen.load(Ordering::SeqCst), 6);
        assert!(!registry.state.lock().notifying);
    }

    struct PanicOnce {
        armed: std::sync::atomic::AtomicBool,
        calls: AtomicUsize,
    }

    impl InvalidationListener for PanicOnce {
        fn on_invalidated(&self, _revision: u64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.armed.swap(false, Ordering::SeqCst) {
                panic!("listener failure");
            }
        }
    }

    #[test]
    fn test_panicking_listener_does_not_wedge_registry() {
        let registry = Arc::new(ListenerRegistry::new());
        let listener = Arc::new(PanicOnce {
            armed: std::sync::atomic::AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let as_dyn: Arc<dyn InvalidationListener> = listener.clone();
        let _sub = registry.subscribe(Arc::downgrade(&as_dyn));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| registry.notify(1)));
        assert!(result.is_err());

        registry.notify(2);
        assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
    }
}
