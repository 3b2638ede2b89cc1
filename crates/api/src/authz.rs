//! API-side authorization guard for commands.
//!
//! Enforced at the command boundary (before dispatch), keeping domain
//! aggregates and infra auth-agnostic.

use verdant_auth::{
    AuthzError, CommandAuthorization, Permission, Principal, Role, TenantMembership, authorize,
};

use crate::context::{PrincipalContext, TenantContext};

/// Check authorization for a command in the current request context.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership,
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

/// Static role → permission policy.
///
/// Unknown roles grant nothing.
pub fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    if roles.contains(&Role::ADMIN) {
        return vec![Permission::WILDCARD];
    }

    let mut granted: Vec<Permission> = Vec::new();
    for perm in roles.iter().flat_map(role_permissions) {
        if !granted.contains(&perm) {
            granted.push(perm);
        }
    }
    granted
}

fn role_permissions(role: &Role) -> Vec<Permission> {
    match role.as_str() {
        "manager" => vec![
            Permission::PRODUCTS_CREATE,
            Permission::PRODUCTS_UPDATE,
            Permission::CONSIGNMENTS_CREATE,
            Permission::CONSIGNMENTS_SELL,
            Permission::CONSIGNMENTS_RETURN,
            Permission::CONSIGNMENTS_SETTLE,
            Permission::CONSIGNMENTS_MANAGE,
        ],
        "clerk" => vec![Permission::CONSIGNMENTS_SELL, Permission::CONSIGNMENTS_RETURN],
        _ => Vec::new(),
    }
}
