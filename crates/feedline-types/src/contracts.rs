//! Contracts between the timeline engine and its collaborators.
//!
//! The engine reaches storage, the live item stream and the notification layer
//! only through these traits. Timelines are composed from them rather than
//! specialised by inheritance.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StorageResult;
use crate::item::{Item, ItemId};

/// Something that can decide whether it accepts an item.
pub trait Filterable {
    /// Returns true if `item` passes.
    fn accepts(&self, item: &Item) -> bool;
}

/// A storage query executor.
///
/// `query_text` is a WHERE-clause in the engine's query dialect. Implementations
/// return items matching it with `id < before` (when given), newest first, at
/// most `limit` of them (when given).
#[async_trait]
pub trait Fetchable: Send + Sync {
    /// Executes a query against storage.
    async fn fetch(
        &self,
        query_text: &str,
        before: Option<ItemId>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Item>>;
}

/// A push source of live items.
///
/// Each call to [`subscribe`](ItemStream::subscribe) yields an independent
/// receiver; dropping the receiver is the unsubscription.
pub trait ItemStream: Send + Sync {
    /// Subscribes to items published from now on.
    fn subscribe(&self) -> broadcast::Receiver<Item>;
}

/// Receives "new item accepted" events from timelines that ask for them.
///
/// Fire-and-forget: the engine ignores anything the sink does.
pub trait NotificationSink: Send + Sync {
    /// Called once for each live item newly inserted into `timeline`.
    fn notify_new_arrival(&self, timeline: &str, item: &Item);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AuthorIs(&'static str);

    impl Filterable for AuthorIs {
        fn accepts(&self, item: &Item) -> bool {
            item.author == self.0
        }
    }

    struct Fixed(Vec<Item>);

    #[async_trait]
    impl Fetchable for Fixed {
        async fn fetch(
            &self,
            _query_text: &str,
            before: Option<ItemId>,
            limit: Option<usize>,
        ) -> StorageResult<Vec<Item>> {
            Ok(self
                .0
                .iter()
                .filter(|item| before.map_or(true, |b| item.id < b))
                .take(limit.unwrap_or(usize::MAX))
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_filterable_is_object_safe() {
        let filter: Box<dyn Filterable> = Box::new(AuthorIs("alice"));
        assert!(filter.accepts(&Item::new(1u64, "alice", "")));
        assert!(!filter.accepts(&Item::new(2u64, "bob", "")));
    }

    #[tokio::test]
    async fn test_fetchable_is_object_safe() {
        let storage: Box<dyn Fetchable> = Box::new(Fixed(vec![
            Item::new(3u64, "a", ""),
            Item::new(2u64, "a", ""),
            Item::new(1u64, "a", ""),
        ]));
        let items = storage.fetch("1 = 1", Some(ItemId(3)), Some(1)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, ItemId(2));
    }
}
