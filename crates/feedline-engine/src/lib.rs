//! Filter-driven timeline engine.
//!
//! This crate turns a user-authored filter into a live, ordered view of feed
//! items:
//!
//! - [`filter`] parses filter text and compiles each expression into a storage
//!   query text and an in-memory predicate that always agree
//! - [`FilterQuery`] shares one expression between timelines, memoizes its
//!   compiled form and signals changes over the [`bus`]
//! - [`TimelineModel`] backfills from storage, admits live items, and clears
//!   and refetches when its query changes
//! - [`memory`] holds in-memory storage and stream collaborators
//!
//! Storage, the live stream and notifications are reached only through the
//! traits in [`feedline_types`].

pub mod buffer;
pub mod bus;
pub mod config;
pub mod filter;
pub mod memory;
pub mod query;
pub mod timeline;

pub use buffer::{BufferDelta, TimelineBuffer};
pub use bus::{InvalidationListener, InvalidationSubscription, ListenerRegistry, SubscriptionId};
pub use config::TimelineConfig;
pub use filter::{compile, CompiledFilter, FilterError, FilterExpression, FilterParser};
pub use memory::{LiveStream, MemoryStorage};
pub use query::FilterQuery;
pub use timeline::{
    FetchOutcome, TimelineBuilder, TimelineError, TimelineEvent, TimelineModel, TimelinePhase,
};
