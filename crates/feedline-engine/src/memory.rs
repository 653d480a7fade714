//! In-memory collaborators: a storage executor that runs query text against a
//! vector of items, and a broadcast-backed live stream.
//!
//! They back the CLI and the test suites, and serve as reference
//! implementations of the [`Fetchable`] and [`ItemStream`] contracts.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use feedline_types::{Fetchable, Item, ItemId, ItemStream, StorageError, StorageResult};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::filter::QueryText;

/// Default capacity of a [`LiveStream`] channel.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// A [`Fetchable`] over items held in memory.
///
/// Stored items are deduplicated by id: inserting an id again replaces the
/// item.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<Vec<Item>>,
    calls: AtomicUsize,
    last_query: RwLock<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage pre-filled with `items`.
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let storage = Self::new();
        storage.extend(items);
        storage
    }

    /// Stores one item.
    pub fn insert(&self, item: Item) {
        let mut items = self.items.write();
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    /// Stores several items.
    pub fn extend(&self, items: impl IntoIterator<Item = Item>) {
        for item in items {
            self.insert(item);
        }
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Number of fetches executed so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The query text of the most recent fetch.
    pub fn last_query(&self) -> Option<String> {
        self.last_query.read().clone()
    }

    /// Runs a query synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidQuery`] if `query_text` does not parse.
    pub fn query(
        &self,
        query_text: &str,
        before: Option<ItemId>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Item>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.write() = Some(query_text.to_string());

        let query =
            QueryText::parse(query_text).map_err(|e| StorageError::invalid_query(e.to_string()))?;

        let mut matched: Vec<Item> = self
            .items
            .read()
            .iter()
            .filter(|item| before.map_or(true, |before| item.id < before))
            .filter(|item| query.matches(item))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(limit) = limit {
            matched.truncate(limit);
        }

        tracing::trace!(query = query_text, ?before, ?limit, matched = matched.len(), "memory fetch");
        Ok(matched)
    }
}

#[async_trait]
impl Fetchable for MemoryStorage {
    async fn fetch(
        &self,
        query_text: &str,
        before: Option<ItemId>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Item>> {
        self.query(query_text, before, limit)
    }
}

/// A live item stream backed by a tokio broadcast channel.
#[derive(Debug)]
pub struct LiveStream {
    sender: broadcast::Sender<Item>,
}

impl LiveStream {
    /// Creates a stream with [`DEFAULT_STREAM_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// Creates a stream whose subscribers may fall `capacity` items behind
    /// before they start lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an item to every subscriber. Returns how many received it.
    pub fn publish(&self, item: Item) -> usize {
        self.sender.send(item).unwrap_or(0)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LiveStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemStream for LiveStream {
    fn subscribe(&self) -> broadcast::Receiver<Item> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_item(id: u64, author: &str) -> Item {
        Item::new(id, author, "")
    }

    fn storage() -> MemoryStorage {
        MemoryStorage::with_items(vec![
            make_item(1, "alice"),
            make_item(5, "bob"),
            make_item(3, "alice"),
            make_item(4, "alice"),
        ])
    }

    #[tokio::test]
    async fn test_fetch_newest_first() {
        let items = storage().fetch("(author = 'alice')", None, None).await.unwrap();
        let ids: Vec<u64> = items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![4, 3, 1]);
    }

    #[tokio::test]
    async fn test_fetch_before_and_limit() {
        let items = storage().fetch("(1 = 1)", Some(ItemId(5)), Some(2)).await.unwrap();
        let ids: Vec<u64> = items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_fetch_invalid_query() {
        let storage = storage();
        let err = storage.fetch("author ==", None, None).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuery { .. }));
        assert_eq!(storage.calls(), 1);
        assert_eq!(storage.last_query().as_deref(), Some("author =="));
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let storage = storage();
        storage.insert(Item::new(1u64, "carol", ""));
        assert_eq!(storage.len(), 4);
        let items = storage.query("(author = 'carol')", None, None).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_live_stream_fan_out() {
        let stream = LiveStream::new();
        assert_eq!(stream.publish(make_item(1, "a")), 0);

        let mut rx1 = stream.subscribe();
        let mut rx2 = stream.subscribe();
        assert_eq!(stream.subscriber_count(), 2);
        assert_eq!(stream.publish(make_item(2, "a")), 2);
        assert_eq!(rx1.recv().await.unwrap().id, ItemId(2));
        assert_eq!(rx2.recv().await.unwrap().id, ItemId(2));

        drop(rx1);
        assert_eq!(stream.subscriber_count(), 1);
    }
}
