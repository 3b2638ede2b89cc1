//! Per-request identity, inserted as extensions by the auth middleware.

use verdant_auth::{JwtClaims, PrincipalId, Role};
use verdant_core::TenantId;

/// The tenant every command and query of this request is scoped to.
///
/// Comes from the token only; no route accepts a tenant id from the client.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}

/// Split validated claims into the two request extensions.
pub fn from_claims(claims: JwtClaims) -> (TenantContext, PrincipalContext) {
    (
        TenantContext::new(claims.tenant_id),
        PrincipalContext::new(claims.sub, claims.roles),
    )
}
