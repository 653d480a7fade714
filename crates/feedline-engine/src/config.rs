//! Per-timeline settings.

use serde::{Deserialize, Serialize};

/// Default number of items a timeline retains.
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Default number of items requested by the initial backfill.
pub const DEFAULT_BACKFILL_COUNT: usize = 200;

/// Default capacity of the timeline event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Settings for one timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Display name, passed to the notification sink.
    pub name: String,

    /// Maximum number of items kept in the buffer.
    pub max_items: usize,

    /// `limit` of the backfill fetch issued on activation and refetch.
    pub backfill_count: usize,

    /// Forward newly arrived live items to the notification sink.
    pub notify_new_arrivals: bool,

    /// Count newly arrived live items until the host reads the count.
    pub count_unread: bool,

    /// Capacity of the [`TimelineEvent`](crate::TimelineEvent) channel. Slow
    /// event subscribers lag rather than block the timeline.
    pub event_capacity: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            name: "timeline".to_string(),
            max_items: DEFAULT_MAX_ITEMS,
            backfill_count: DEFAULT_BACKFILL_COUNT,
            notify_new_arrivals: false,
            count_unread: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl TimelineConfig {
    /// Creates a config with the given name and default settings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
