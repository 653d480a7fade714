//! Ordered, deduplicated, bounded item storage for one timeline.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use feedline_types::{Item, ItemId};
use serde::Serialize;

/// What one insert/merge/clear batch did to a buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferDelta {
    /// Ids that were not present before the batch and still are after it.
    pub inserted: Vec<ItemId>,
    /// Ids whose item was overwritten in place.
    pub updated: Vec<ItemId>,
    /// Ids removed to honor the size bound.
    pub evicted: Vec<ItemId>,
    /// The buffer was emptied.
    pub cleared: bool,
}

impl BufferDelta {
    /// Returns true if the batch changed nothing.
    pub fn is_empty(&self) -> bool {
        !self.cleared
            && self.inserted.is_empty()
            && self.updated.is_empty()
            && self.evicted.is_empty()
    }

    fn cleared() -> Self {
        Self {
            cleared: true,
            ..Self::default()
        }
    }
}

/// The materialized items of a timeline.
///
/// Items are keyed by id, so an id is present at most once and re-inserting it
/// overwrites the stored item. Iteration is newest first (descending id). When
/// the buffer grows past `max_items`, the oldest items are evicted.
#[derive(Debug, Clone)]
pub struct TimelineBuffer {
    items: BTreeMap<ItemId, Item>,
    max_items: usize,
}

impl TimelineBuffer {
    /// Creates an empty buffer holding at most `max_items` items.
    pub fn new(max_items: usize) -> Self {
        Self {
            items: BTreeMap::new(),
            max_items,
        }
    }

    /// The retention bound.
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Inserts one item.
    pub fn insert(&mut self, item: Item) -> BufferDelta {
        self.merge(std::iter::once(item))
    }

    /// Inserts a batch of items, then evicts down to the bound once.
    ///
    /// An item inserted and then evicted within the same batch was never
    /// visible and is reported in neither list.
    pub fn merge(&mut self, items: impl IntoIterator<Item = Item>) -> BufferDelta {
        let mut delta = BufferDelta::default();

        for item in items {
            match self.items.entry(item.id) {
                Entry::Occupied(mut slot) => {
                    slot.insert(item);
                    if !delta.inserted.contains(slot.key()) && !delta.updated.contains(slot.key()) {
                        delta.updated.push(*slot.key());
                    }
                }
                Entry::Vacant(slot) => {
                    delta.inserted.push(*slot.key());
                    slot.insert(item);
                }
            }
        }

        while self.items.len() > self.max_items {
            let Some((id, _)) = self.items.pop_first() else {
                break;
            };
            if let Some(pos) = delta.inserted.iter().position(|i| *i == id) {
                delta.inserted.remove(pos);
            } else {
                delta.updated.retain(|i| *i != id);
                delta.evicted.push(id);
            }
        }

        delta
    }

    /// Removes every item.
    pub fn clear(&mut self) -> BufferDelta {
        if self.items.is_empty() {
            return BufferDelta::default();
        }
        self.items.clear();
        BufferDelta::cleared()
    }

    /// Items, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values().rev()
    }

    /// A snapshot of the items, newest first.
    pub fn items(&self) -> Vec<Item> {
        self.iter().cloned().collect()
    }

    /// The item stored under `id`.
    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The newest id, if any.
    pub fn newest(&self) -> Option<ItemId> {
        self.items.keys().next_back().copied()
    }

    /// The oldest id, if any. Useful as the `before` cursor for paging back.
    pub fn oldest(&self) -> Option<ItemId> {
        self.items.keys().next().copied()
    }
}
