//! Append-only event store boundary.
//!
//! Every range, credit and document is an event stream; the store is the
//! durable record of all of them. Two writers racing on one stream are
//! separated by the expected-version check at append.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
