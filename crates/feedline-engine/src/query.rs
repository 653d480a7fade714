//! Shared, memoized filter queries.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bus::{InvalidationListener, InvalidationSubscription, ListenerRegistry};
use crate::filter::{compile, CompiledFilter, FilterExpression, FilterParser, FilterResult};

/// A filter expression shared between timelines, with its compiled form.
///
/// `FilterQuery` is a cheap handle: clones refer to the same query. The
/// compiled filter is computed on first use and reused until the expression
/// changes. Every change bumps the revision and fires the invalidation signal
/// exactly once.
///
/// # Example
///
/// ```
/// use feedline_engine::FilterQuery;
///
/// let query = FilterQuery::parse(r#"author == "alice""#).unwrap();
/// assert_eq!(query.compiled().query_text(), "(author = 'alice')");
///
/// // An empty query matches nothing.
/// assert!(FilterQuery::empty().compiled().is_contradiction());
/// ```
#[derive(Clone)]
pub struct FilterQuery {
    inner: Arc<QueryInner>,
}

struct QueryInner {
    state: Mutex<QueryState>,
    registry: Arc<ListenerRegistry>,
    compilations: AtomicUsize,
}

struct QueryState {
    expression: FilterExpression,
    /// The filter text the expression was parsed from, if any.
    source: Option<String>,
    compiled: Option<Arc<CompiledFilter>>,
    revision: u64,
    /// Number of active timelines using this query.
    activations: usize,
}

impl FilterQuery {
    /// Creates a query for `expression`.
    pub fn new(expression: FilterExpression) -> Self {
        Self::with_source(expression, None)
    }

    /// Creates a query with no filter configured. It accepts nothing.
    pub fn empty() -> Self {
        Self::new(FilterExpression::Contradiction)
    }

    /// Parses filter text into a new query.
    ///
    /// # Errors
    ///
    /// Returns the parse error if `text` is not a valid filter.
    pub fn parse(text: &str) -> FilterResult<Self> {
        let expression = FilterParser::parse(text)?;
        Ok(Self::with_source(expression, Some(text.to_string())))
    }

    fn with_source(expression: FilterExpression, source: Option<String>) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                state: Mutex::new(QueryState {
                    expression,
                    source,
                    compiled: None,
                    revision: 0,
                    activations: 0,
                }),
                registry: Arc::new(ListenerRegistry::new()),
                compilations: AtomicUsize::new(0),
            }),
        }
    }

    /// The current expression.
    pub fn expression(&self) -> FilterExpression {
        self.inner.state.lock().expression.clone()
    }

    /// The filter text the current expression came from, if it was parsed.
    pub fn source(&self) -> Option<String> {
        self.inner.state.lock().source.clone()
    }

    /// Replaces the expression, discards the compiled filter and fires the
    /// invalidation signal.
    pub fn set_expression(&self, expression: FilterExpression) {
        self.replace(expression, None);
    }

    /// Replaces the expression by parsing `text`.
    ///
    /// On a parse error the query is set to match nothing and the error is
    /// returned for display. Either way the signal fires once.
    ///
    /// # Errors
    ///
    /// Returns the parse error if `text` is not a valid filter.
    pub fn set_source(&self, text: &str) -> FilterResult<()> {
        match FilterParser::parse(text) {
            Ok(expression) => {
                self.replace(expression, Some(text.to_string()));
                Ok(())
            }
            Err(err) => {
                tracing::debug!(error = %err, "filter text rejected, query now matches nothing");
                self.replace(FilterExpression::Contradiction, Some(text.to_string()));
                Err(err)
            }
        }
    }

    fn replace(&self, expression: FilterExpression, source: Option<String>) {
        let revision = {
            let mut state = self.inner.state.lock();
            state.expression = expression;
            state.source = source;
            state.compiled = None;
            state.revision += 1;
            state.revision
        };
        self.inner.registry.notify(revision);
    }

    /// The compiled filter for the current expression.
    ///
    /// Compiles at most once per revision.
    pub fn compiled(&self) -> Arc<CompiledFilter> {
        self.compiled_with_revision().0
    }

    /// The compiled filter together with the revision it was compiled from.
    pub fn compiled_with_revision(&self) -> (Arc<CompiledFilter>, u64) {
        let mut state = self.inner.state.lock();
        let revision = state.revision;
        if let Some(compiled) = &state.compiled {
            return (Arc::clone(compiled), revision);
        }
        let compiled = Arc::new(compile(&state.expression));
        self.inner.compilations.fetch_add(1, Ordering::Relaxed);
        state.compiled = Some(Arc::clone(&compiled));
        (compiled, revision)
    }

    /// How many times this query has been compiled.
    pub fn compilations(&self) -> usize {
        self.inner.compilations.load(Ordering::Relaxed)
    }

    /// Monotonic counter of expression changes.
    pub fn revision(&self) -> u64 {
        self.inner.state.lock().revision
    }

    /// Marks the query as used by one more active timeline.
    ///
    /// Every toggle fires the signal while listeners are registered, so
    /// timelines already wired to the query refresh when another one joins.
    /// Must not be called while holding a lock a listener takes.
    pub fn activate(&self) {
        let revision = {
            let mut state = self.inner.state.lock();
            state.activations += 1;
            state.revision
        };
        self.toggled(revision);
    }

    /// Marks the query as used by one fewer active timeline.
    ///
    /// Fires the signal like [`activate`](Self::activate). A call with no
    /// outstanding activation is ignored.
    pub fn deactivate(&self) {
        let revision = {
            let mut state = self.inner.state.lock();
            if state.activations == 0 {
                return;
            }
            state.activations -= 1;
            state.revision
        };
        self.toggled(revision);
    }

    fn toggled(&self, revision: u64) {
        if !self.inner.registry.is_empty() {
            self.inner.registry.notify(revision);
        }
    }

    /// Returns true while at least one timeline has activated the query.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().activations > 0
    }

    /// Registers an invalidation listener. The guard unsubscribes on drop.
    pub fn subscribe(&self, listener: Weak<dyn InvalidationListener>) -> InvalidationSubscription {
        self.inner.registry.subscribe(listener)
    }

    /// Number of live invalidation listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns true if both handles refer to the same query.
    pub fn ptr_eq(&self, other: &FilterQuery) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for FilterQuery {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<FilterExpression> for FilterQuery {
    fn from(expression: FilterExpression) -> Self {
        Self::new(expression)
    }
}

impl fmt::Debug for FilterQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FilterQuery")
            .field("expression", &state.expression)
            .field("revision", &state.revision)
            .field("activations", &state.activations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    use feedline_types::Item;

    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
        last: AtomicU64,
    }

    impl InvalidationListener for Recorder {
        fn on_invalidated(&self, revision: u64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last.store(revision, Ordering::SeqCst);
        }
    }

    fn listen(query: &FilterQuery) -> (Arc<Recorder>, InvalidationSubscription) {
        let recorder = Arc::new(Recorder::default());
        let as_dyn: Arc<dyn InvalidationListener> = recorder.clone();
        let sub = query.subscribe(Arc::downgrade(&as_dyn));
        (recorder, sub)
    }

    #[test]
    fn test_compiled_is_memoized() {
        let query = FilterQuery::parse("has_media").unwrap();
        let first = query.compiled();
        let second = query.compiled();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(query.compilations(), 1);
    }

    #[test]
    fn test_set_expression_recompiles_once() {
        let query = FilterQuery::parse("has_media").unwrap();
        query.compiled();
        query.set_expression(FilterExpression::Literal(true));
        assert_eq!(query.compiled().query_text(), "(1 = 1)");
        query.compiled();
        assert_eq!(query.compilations(), 2);
        assert_eq!(query.revision(), 1);
    }

    #[test]
    fn test_set_expression_fires_once() {
        let query = FilterQuery::empty();
        let (recorder, _sub) = listen(&query);

        query.set_expression(FilterExpression::Literal(true));

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.last.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_source_error_matches_nothing() {
        let query = FilterQuery::parse("true").unwrap();
        let (recorder, _sub) = listen(&query);

        let err = query.set_source("autor == 'x'").unwrap_err();

        assert!(err.to_string().contains("Did you mean 'author'?"));
        assert!(query.compiled().is_contradiction());
        assert_eq!(query.source().as_deref(), Some("autor == 'x'"));
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_source_ok() {
        let query = FilterQuery::empty();
        query.set_source("author == 'alice'").unwrap();
        assert!(query.compiled().accepts(&Item::new(1u64, "alice", "")));
    }

    #[test]
    fn test_empty_query_accepts_nothing() {
        let query = FilterQuery::default();
        assert!(!query.compiled().accepts(&Item::new(1u64, "alice", "")));
        assert_eq!(query.compiled().query_text(), "(0 = 1)");
    }

    #[test]
    fn test_every_activation_toggle_fires() {
        let query = FilterQuery::empty();
        let (recorder, _sub) = listen(&query);

        query.activate();
        query.activate();
        assert!(query.is_active());
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);

        query.deactivate();
        assert!(query.is_active());
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
        query.deactivate();
        assert!(!query.is_active());
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 4);

        // Extra deactivation is ignored.
        query.deactivate();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_activation_toggle_reports_current_revision() {
        let query = FilterQuery::empty();
        query.set_expression(FilterExpression::Literal(true));
        let (recorder, _sub) = listen(&query);

        query.activate();

        assert_eq!(recorder.last.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_activation_without_listeners_is_silent() {
        let query = FilterQuery::empty();
        query.activate();
        let (recorder, _sub) = listen(&query);
        query.set_expression(FilterExpression::Literal(false));
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let query = FilterQuery::empty();
        let clone = query.clone();
        clone.set_expression(FilterExpression::Literal(true));
        assert!(query.ptr_eq(&clone));
        assert_eq!(query.revision(), 1);
        assert!(!query.ptr_eq(&FilterQuery::empty()));
    }

    #[test]
    fn test_listener_count_tracks_guards() {
        let query = FilterQuery::empty();
        let (_recorder, sub) = listen(&query);
        assert_eq!(query.listener_count(), 1);
        drop(sub);
        assert_eq!(query.listener_count(), 0);
    }
}
