//! `verdant-auth` — authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer extracts a bearer token,
//! hands it to a [`JwtValidator`], and checks [`Permission`]s with
//! [`authorize`] before dispatching commands.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
