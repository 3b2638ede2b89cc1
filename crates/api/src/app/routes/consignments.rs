use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};

use verdant_auth::Permission;
use verdant_consignment::{
    CancelConsignment, ConsignmentCommand, ConsignmentEvent, ConsignmentId, ConsignmentItemId,
    ConsignmentStatus, ExpireConsignment, RegisterSale, ReturnItems, SaleId, SettleConsignment,
};
use verdant_core::{AggregateId, DomainError, Percentage};
use verdant_infra::command_dispatcher::DispatchError;
use verdant_infra::consignments::{
    NewConsignment, NewConsignmentLine, create_consignment as create_with_number,
    execute_consignment_command,
};
use verdant_infra::event_store::StoredEvent;
use verdant_products::ProductId;

use crate::app::routes::common::{CmdAuth, JsonBody, parse_amount, parse_id};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_consignment).get(list_consignments))
        .route("/summary", get(consignment_summary))
        .route("/:id", get(get_consignment))
        .route("/:id/sales", post(register_sale))
        .route("/:id/returns", post(return_items))
        .route("/:id/settle", post(settle_consignment))
        .route("/:id/cancel", post(cancel_consignment))
        .route("/:id/expire", post(expire_consignment))
}

fn decode_events(committed: &[StoredEvent]) -> Result<Vec<ConsignmentEvent>, Response> {
    committed
        .iter()
        .map(|stored| {
            serde_json::from_value::<ConsignmentEvent>(stored.payload.clone()).map_err(|e| {
                errors::dispatch_error_to_response(DispatchError::Deserialize(e.to_string()))
            })
        })
        .collect()
}

/// Status the consignment moved to as part of this command, if any.
fn status_change(events: &[ConsignmentEvent]) -> Option<ConsignmentStatus> {
    events.iter().rev().find_map(|ev| match ev {
        ConsignmentEvent::ConsignmentPartiallySettled(_) => Some(ConsignmentStatus::PartiallySettled),
        ConsignmentEvent::ConsignmentReturned(_) => Some(ConsignmentStatus::Returned),
        ConsignmentEvent::ConsignmentSettled(_) => Some(ConsignmentStatus::Settled),
        ConsignmentEvent::ConsignmentCancelled(_) => Some(ConsignmentStatus::Cancelled),
        ConsignmentEvent::ConsignmentExpired(_) => Some(ConsignmentStatus::Expired),
        _ => None,
    })
}

/// Authorize and dispatch one command against an existing consignment.
fn run(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    consignment_id: ConsignmentId,
    command: ConsignmentCommand,
    required: Permission,
) -> Result<Vec<ConsignmentEvent>, Response> {
    let command = CmdAuth::new(command, required).authorized(tenant, principal)?;
    let committed = execute_consignment_command(
        services.dispatcher(),
        tenant.tenant_id(),
        consignment_id,
        command,
    )
    .map_err(errors::dispatch_error_to_response)?;
    decode_events(&committed)
}

fn parse_consignment_id(raw: &str) -> Result<ConsignmentId, Response> {
    parse_id(raw, "consignment").map(ConsignmentId::new)
}

fn parse_item_id(raw: &str) -> Result<ConsignmentItemId, Response> {
    parse_id(raw, "consignment item").map(ConsignmentItemId::new)
}

fn parse_percentage(value: f64, field: &str) -> Result<Percentage, Response> {
    Percentage::from_percent(value).map_err(|e| match e {
        DomainError::Validation(msg) => errors::domain_error_to_response(DomainError::validation(
            format!("{field}: {msg}"),
        )),
        other => errors::domain_error_to_response(other),
    })
}

fn lifecycle_response(consignment_id: ConsignmentId, events: &[ConsignmentEvent]) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "id": consignment_id.to_string(),
            "status": status_change(events),
            "events_committed": events.len(),
        })),
    )
        .into_response()
}

pub async fn create_consignment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    JsonBody(body): JsonBody<dto::CreateConsignmentRequest>,
) -> Response {
    if let Err(e) = crate::authz::authorize_command(
        &tenant,
        &principal,
        &CmdAuth::new((), Permission::CONSIGNMENTS_CREATE),
    ) {
        return errors::forbidden(e);
    }

    let store_percentage = match parse_percentage(body.store_percentage, "store_percentage") {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let owner_percentage = match parse_percentage(body.owner_percentage, "owner_percentage") {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let mut items = Vec::with_capacity(body.items.len());
    for line in body.items {
        let product_id = match parse_id(&line.product_id, "product") {
            Ok(agg) => ProductId::new(agg),
            Err(resp) => return resp,
        };
        let (cost_price, retail_price) = match (
            parse_amount(line.cost_price, "cost_price"),
            parse_amount(line.retail_price, "retail_price"),
        ) {
            (Ok(cost), Ok(retail)) => (cost, retail),
            (Err(resp), _) | (_, Err(resp)) => return resp,
        };
        items.push(NewConsignmentLine {
            product_id,
            quantity: line.quantity,
            cost_price,
            retail_price,
        });
    }

    let input = NewConsignment {
        tenant_id: tenant.tenant_id(),
        expires_at: body.expires_at,
        store_percentage,
        owner_percentage,
        notes: body.notes,
        terms: body.terms,
        items,
        occurred_at: Utc::now(),
    };

    match create_with_number(services.dispatcher(), input) {
        Ok(created) => (
            StatusCode::CREATED,
            Json(json!({
                "id": created.consignment_id.to_string(),
                "number": created.number,
                "item_ids": created.item_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
                "events_committed": created.committed.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn register_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<dto::RegisterSaleRequest>,
) -> Response {
    let (consignment_id, item_id) = match (parse_consignment_id(&id), parse_item_id(&body.item_id)) {
        (Ok(c), Ok(i)) => (c, i),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    let unit_price = match parse_amount(body.unit_price, "unit_price") {
        Ok(price) => price,
        Err(resp) => return resp,
    };

    let cmd = ConsignmentCommand::RegisterSale(RegisterSale {
        tenant_id: tenant.tenant_id(),
        consignment_id,
        sale_id: SaleId::new(AggregateId::new()),
        item_id,
        quantity: body.quantity,
        unit_price,
        occurred_at: body.sold_at.unwrap_or_else(Utc::now),
    });

    let events = match run(
        &services,
        &tenant,
        &principal,
        consignment_id,
        cmd,
        Permission::CONSIGNMENTS_SELL,
    ) {
        Ok(events) => events,
        Err(resp) => return resp,
    };

    let sale: Option<JsonValue> = events.iter().find_map(|ev| match ev {
        ConsignmentEvent::SaleRegistered(e) => Some(dto::sale_registered_to_json(e)),
        _ => None,
    });

    (
        StatusCode::CREATED,
        Json(json!({
            "consignment_id": consignment_id.to_string(),
            "sale": sale,
            "status": status_change(&events),
            "events_committed": events.len(),
        })),
    )
        .into_response()
}

pub async fn return_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<dto::ReturnItemsRequest>,
) -> Response {
    let (consignment_id, item_id) = match (parse_consignment_id(&id), parse_item_id(&body.item_id)) {
        (Ok(c), Ok(i)) => (c, i),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    let cmd = ConsignmentCommand::ReturnItems(ReturnItems {
        tenant_id: tenant.tenant_id(),
        consignment_id,
        item_id,
        quantity: body.quantity,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    match run(
        &services,
        &tenant,
        &principal,
        consignment_id,
        cmd,
        Permission::CONSIGNMENTS_RETURN,
    ) {
        Ok(events) => lifecycle_response(consignment_id, &events),
        Err(resp) => resp,
    }
}

pub async fn settle_consignment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::SettleConsignmentRequest>>,
) -> Response {
    let consignment_id = match parse_consignment_id(&id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let cmd = ConsignmentCommand::SettleConsignment(SettleConsignment {
        tenant_id: tenant.tenant_id(),
        consignment_id,
        notes: body.notes,
        occurred_at: Utc::now(),
    });

    let events = match run(
        &services,
        &tenant,
        &principal,
        consignment_id,
        cmd,
        Permission::CONSIGNMENTS_SETTLE,
    ) {
        Ok(events) => events,
        Err(resp) => return resp,
    };

    match events.iter().find_map(|ev| match ev {
        ConsignmentEvent::ConsignmentSettled(e) => Some(e),
        _ => None,
    }) {
        Some(settled) => (
            StatusCode::OK,
            Json(json!({
                "id": consignment_id.to_string(),
                "status": ConsignmentStatus::Settled,
                "total_sold": settled.total_sold.cents(),
                "store_amount": settled.store_amount.cents(),
                "owner_amount": settled.owner_amount.cents(),
            })),
        )
            .into_response(),
        None => lifecycle_response(consignment_id, &events),
    }
}

pub async fn cancel_consignment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelConsignmentRequest>>,
) -> Response {
    let consignment_id = match parse_consignment_id(&id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let cmd = ConsignmentCommand::CancelConsignment(CancelConsignment {
        tenant_id: tenant.tenant_id(),
        consignment_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });

    match run(
        &services,
        &tenant,
        &principal,
        consignment_id,
        cmd,
        Permission::CONSIGNMENTS_MANAGE,
    ) {
        Ok(events) => lifecycle_response(consignment_id, &events),
        Err(resp) => resp,
    }
}

pub async fn expire_consignment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Response {
    let consignment_id = match parse_consignment_id(&id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let cmd = ConsignmentCommand::ExpireConsignment(ExpireConsignment {
        tenant_id: tenant.tenant_id(),
        consignment_id,
        occurred_at: Utc::now(),
    });

    match run(
        &services,
        &tenant,
        &principal,
        consignment_id,
        cmd,
        Permission::CONSIGNMENTS_MANAGE,
    ) {
        Ok(events) => lifecycle_response(consignment_id, &events),
        Err(resp) => resp,
    }
}

pub async fn get_consignment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Response {
    let consignment_id = match parse_consignment_id(&id) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match services
        .read_models()
        .consignments
        .get(tenant.tenant_id(), &consignment_id)
    {
        Some(rm) => (StatusCode::OK, Json(dto::consignment_to_json(&rm, true))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "consignment not found"),
    }
}

pub async fn list_consignments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::ListConsignmentsQuery>,
) -> Response {
    let status = match query.status.as_deref().map(str::parse::<ConsignmentStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => return errors::domain_error_to_response(e),
    };

    let items = services
        .read_models()
        .consignments
        .list(tenant.tenant_id(), status)
        .iter()
        .map(|rm| dto::consignment_to_json(rm, false))
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn consignment_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> Response {
    let summary = services.read_models().consignments.summary(tenant.tenant_id());
    (StatusCode::OK, Json(dto::summary_to_json(summary))).into_response()
}
