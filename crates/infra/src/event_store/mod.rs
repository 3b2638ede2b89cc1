//! Append-only event store boundary.
//!
//! Defines the storage-agnostic `EventStore` trait plus the in-memory backend
//! (default) and a Postgres backend behind the `postgres` feature.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
