//! Tenant-isolated read model storage.
//!
//! Read models are disposable: they are rebuilt from the event store at
//! startup and kept current by the projection worker.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
