use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;

use verdant_auth::Permission;
use verdant_infra::projections::aggregate_types;
use verdant_tenants::{
    ReactivateTenant, RegisterTenant, SuspendTenant, TenantCommand, TenantProfile, TenantProfileId,
};

use crate::app::routes::common::{CmdAuth, JsonBody};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

/// Profile of the caller's own tenant (the one in the token).
pub fn router() -> Router {
    Router::new()
        .route("/", post(register_tenant).get(get_tenant))
        .route("/suspend", post(suspend_tenant))
        .route("/reactivate", post(reactivate_tenant))
}

fn dispatch_profile(
    services: &AppServices,
    tenant: &TenantContext,
    command: TenantCommand,
    success: StatusCode,
) -> Response {
    let tenant_id = tenant.tenant_id();
    match services.dispatch::<TenantProfile>(
        tenant_id,
        TenantProfileId::for_tenant(tenant_id).0,
        aggregate_types::TENANT_PROFILE,
        command,
        |_t, id| TenantProfile::empty(TenantProfileId(id)),
    ) {
        Ok(committed) => (
            success,
            Json(json!({
                "tenant_id": tenant_id.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn register_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    JsonBody(body): JsonBody<dto::RegisterTenantRequest>,
) -> Response {
    let cmd = TenantCommand::RegisterTenant(RegisterTenant {
        tenant_id: tenant.tenant_id(),
        name: body.name,
        contact_email: body.contact_email,
        occurred_at: Utc::now(),
    });

    match CmdAuth::new(cmd, Permission::TENANTS_REGISTER).authorized(&tenant, &principal) {
        Ok(cmd) => dispatch_profile(&services, &tenant, cmd, StatusCode::CREATED),
        Err(resp) => resp,
    }
}

pub async fn suspend_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Option<Json<dto::SuspendTenantRequest>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let cmd = TenantCommand::SuspendTenant(SuspendTenant {
        tenant_id: tenant.tenant_id(),
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    match CmdAuth::new(cmd, Permission::TENANTS_MANAGE).authorized(&tenant, &principal) {
        Ok(cmd) => dispatch_profile(&services, &tenant, cmd, StatusCode::OK),
        Err(resp) => resp,
    }
}

pub async fn reactivate_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let cmd = TenantCommand::ReactivateTenant(ReactivateTenant {
        tenant_id: tenant.tenant_id(),
        occurred_at: Utc::now(),
    });

    match CmdAuth::new(cmd, Permission::TENANTS_MANAGE).authorized(&tenant, &principal) {
        Ok(cmd) => dispatch_profile(&services, &tenant, cmd, StatusCode::OK),
        Err(resp) => resp,
    }
}

pub async fn get_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    match services.read_models().tenants.get(tenant.tenant_id()) {
        Some(rm) => (StatusCode::OK, Json(dto::tenant_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "tenant not registered"),
    }
}
