//! Request bodies and JSON mapping of read models.
//!
//! Amounts travel as integer cents; percentages as decimal percents (`70.0`).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use verdant_consignment::{ConsignmentItem, ConsignmentSale, SaleRegistered};
use verdant_infra::projections::{
    ConsignmentReadModel, ConsignmentSummary, ProductReadModel, TenantReadModel,
};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterTenantRequest {
    pub name: String,
    pub contact_email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuspendTenantRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameProductRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsignmentItemRequest {
    pub product_id: String,
    pub quantity: i64,
    pub cost_price: i64,
    pub retail_price: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateConsignmentRequest {
    pub expires_at: Option<DateTime<Utc>>,
    pub store_percentage: f64,
    pub owner_percentage: f64,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<ConsignmentItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSaleRequest {
    pub item_id: String,
    pub quantity: i64,
    pub unit_price: i64,
    /// Defaults to the time the request is handled.
    pub sold_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnItemsRequest {
    pub item_id: String,
    pub quantity: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettleConsignmentRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelConsignmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListConsignmentsQuery {
    pub status: Option<String>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn tenant_to_json(rm: TenantReadModel) -> JsonValue {
    json!({
        "tenant_id": rm.tenant_id.to_string(),
        "name": rm.name,
        "contact_email": rm.contact_email,
        "status": rm.status,
        "suspension_reason": rm.suspension_reason,
        "registered_at": rm.registered_at.to_rfc3339(),
    })
}

pub fn product_to_json(rm: ProductReadModel) -> JsonValue {
    json!({
        "id": rm.product_id.0.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "category": rm.category,
        "status": rm.status,
        "created_at": rm.created_at.to_rfc3339(),
        "updated_at": rm.updated_at.to_rfc3339(),
    })
}

fn item_to_json(item: &ConsignmentItem) -> JsonValue {
    json!({
        "id": item.item_id.to_string(),
        "product_id": item.product_id.0.to_string(),
        "quantity_consigned": item.quantity_consigned,
        "quantity_sold": item.quantity_sold,
        "quantity_returned": item.quantity_returned,
        "quantity_available": item.quantity_available(),
        "cost_price": item.cost_price.cents(),
        "retail_price": item.retail_price.cents(),
    })
}

fn sale_to_json(sale: &ConsignmentSale) -> JsonValue {
    json!({
        "id": sale.sale_id.to_string(),
        "item_id": sale.item_id.to_string(),
        "quantity": sale.quantity,
        "unit_price": sale.unit_price.cents(),
        "total": sale.total.cents(),
        "store_amount": sale.store_amount.cents(),
        "owner_amount": sale.owner_amount.cents(),
        "sold_at": sale.sold_at.to_rfc3339(),
    })
}

pub fn sale_registered_to_json(e: &SaleRegistered) -> JsonValue {
    json!({
        "id": e.sale_id.to_string(),
        "item_id": e.item_id.to_string(),
        "quantity": e.quantity,
        "unit_price": e.unit_price.cents(),
        "total": e.total.cents(),
        "store_amount": e.store_amount.cents(),
        "owner_amount": e.owner_amount.cents(),
        "sold_at": e.sold_at.to_rfc3339(),
    })
}

/// Header plus totals; `detailed` adds items and sales.
pub fn consignment_to_json(rm: &ConsignmentReadModel, detailed: bool) -> JsonValue {
    let c = &rm.consignment;
    let mut body = json!({
        "id": c.id_typed().to_string(),
        "number": c.number(),
        "status": c.status(),
        "created_at": c.created_at().map(|t| t.to_rfc3339()),
        "expires_at": c.expires_at().map(|t| t.to_rfc3339()),
        "store_percentage": c.store_percentage().as_percent(),
        "owner_percentage": c.owner_percentage().as_percent(),
        "notes": c.notes(),
        "terms": c.terms(),
        "settlement_notes": c.settlement_notes(),
        "total_sold": c.total_sold().cents(),
        "store_amount": c.store_due().cents(),
        "owner_amount": c.owner_due().cents(),
        "version": rm.version(),
        "updated_at": rm.updated_at.to_rfc3339(),
    });

    if detailed {
        body["items"] = c.items().iter().map(item_to_json).collect();
        body["sales"] = c.sales().iter().map(sale_to_json).collect();
    }
    body
}

pub fn summary_to_json(s: ConsignmentSummary) -> JsonValue {
    let by_status: serde_json::Map<String, JsonValue> = s
        .by_status
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), json!(count)))
        .collect();

    json!({
        "total": s.total,
        "by_status": by_status,
        "total_sold": s.total_sold.cents(),
        "store_amount": s.store_amount.cents(),
        "owner_amount": s.owner_amount.cents(),
    })
}
