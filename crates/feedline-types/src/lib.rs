//! Item model and collaborator contracts for the feedline timeline engine.
//!
//! This crate holds the types shared between the engine and its hosts:
//!
//! - [`Item`] and [`ItemId`], the feed entries a timeline materializes
//! - [`Field`] and [`FieldValue`], the filterable columns of an item
//! - the collaborator traits the engine consumes ([`Fetchable`], [`ItemStream`],
//!   [`NotificationSink`]) and the [`Filterable`] capability it exposes
//!
//! # Example
//!
//! ```
//! use feedline_types::{Field, FieldValue, Item, ItemId};
//!
//! let item = Item::new(ItemId(42), "alice", "hello world");
//! assert_eq!(item.field_value(Field::Author), FieldValue::Text("alice"));
//! ```

pub mod contracts;
pub mod error;
pub mod item;

pub use contracts::{Fetchable, Filterable, ItemStream, NotificationSink};
pub use error::{StorageError, StorageResult};
pub use item::{Field, FieldKind, FieldValue, Item, ItemId};

/// Commonly used types, for glob import.
pub mod prelude {
    pub use crate::contracts::{Fetchable, Filterable, ItemStream, NotificationSink};
    pub use crate::error::{StorageError, StorageResult};
    pub use crate::item::{Field, FieldKind, FieldValue, Item, ItemId};
}
