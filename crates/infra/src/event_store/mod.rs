//! Append-only event store boundary.
//!
//! Account streams are keyed by address. The trait makes no storage
//! assumptions; the in-memory implementation backs tests and dev setups.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
