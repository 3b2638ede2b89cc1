use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;

use verdant_auth::Permission;
use verdant_core::AggregateId;
use verdant_infra::projections::aggregate_types;
use verdant_products::{
    ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId, RenameProduct,
};

use crate::app::routes::common::{CmdAuth, JsonBody, parse_id};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/rename", post(rename_product))
        .route("/:id/archive", post(archive_product))
}

fn dispatch_product(
    services: &AppServices,
    tenant: &TenantContext,
    product_id: ProductId,
    command: ProductCommand,
    success: StatusCode,
) -> Response {
    match services.dispatch::<Product>(
        tenant.tenant_id(),
        product_id.0,
        aggregate_types::PRODUCT,
        command,
        |_t, id| Product::empty(ProductId::new(id)),
    ) {
        Ok(committed) => (
            success,
            Json(serde_json::json!({
                "id": product_id.0.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    JsonBody(body): JsonBody<dto::CreateProductRequest>,
) -> Response {
    let product_id = ProductId::new(AggregateId::new());
    let cmd = ProductCommand::CreateProduct(CreateProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        sku: body.sku,
        name: body.name,
        category: body.category,
        occurred_at: Utc::now(),
    });

    match CmdAuth::new(cmd, Permission::PRODUCTS_CREATE).authorized(&tenant, &principal) {
        Ok(cmd) => dispatch_product(&services, &tenant, product_id, cmd, StatusCode::CREATED),
        Err(resp) => resp,
    }
}

pub async fn rename_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<dto::RenameProductRequest>,
) -> Response {
    let product_id = match parse_id(&id, "product") {
        Ok(agg) => ProductId::new(agg),
        Err(resp) => return resp,
    };
    let cmd = ProductCommand::RenameProduct(RenameProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        name: body.name,
        occurred_at: Utc::now(),
    });

    match CmdAuth::new(cmd, Permission::PRODUCTS_UPDATE).authorized(&tenant, &principal) {
        Ok(cmd) => dispatch_product(&services, &tenant, product_id, cmd, StatusCode::OK),
        Err(resp) => resp,
    }
}

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    let product_id = match parse_id(&id, "product") {
        Ok(agg) => ProductId::new(agg),
        Err(resp) => return resp,
    };
    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        tenant_id: tenant.tenant_id(),
        product_id,
        occurred_at: Utc::now(),
    });

    match CmdAuth::new(cmd, Permission::PRODUCTS_UPDATE).authorized(&tenant, &principal) {
        Ok(cmd) => dispatch_product(&services, &tenant, product_id, cmd, StatusCode::OK),
        Err(resp) => resp,
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let product_id = match parse_id(&id, "product") {
        Ok(agg) => ProductId::new(agg),
        Err(resp) => return resp,
    };
    match services.read_models().products.get(tenant.tenant_id(), &product_id) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    let items = services
        .read_models()
        .products
        .list(tenant.tenant_id())
        .into_iter()
        .map(dto::product_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
