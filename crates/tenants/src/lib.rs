//! Tenant directory domain module (event-sourced).
//!
//! A tenant is a client business onboarded on the platform. Its profile
//! stream lives at a deterministic id so any command can check whether the
//! tenant is registered and active without a lookup table.

pub mod profile;

pub use profile::{
    ReactivateTenant, RegisterTenant, SuspendTenant, TenantCommand, TenantEvent, TenantProfile,
    TenantProfileId, TenantReactivated, TenantRegistered, TenantStatus, TenantSuspended,
};
