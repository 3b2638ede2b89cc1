//! Event mechanics shared by the domain and infra crates.
//!
//! - [`Event`]: typed, versioned domain facts
//! - [`EventEnvelope`]: tenant + stream metadata around a payload
//! - [`EventBus`]: pub/sub distribution after persistence
//! - [`execute`]: decide-then-apply helper for aggregates (no IO)

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
