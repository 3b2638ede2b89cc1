use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use verdant_core::TenantId;
use verdant_events::EventEnvelope;
use verdant_products::{ProductEvent, ProductId, ProductStatus};

use super::cursor::{CursorCheck, StreamCursors};
use super::{aggregate_types, ProjectionError};
use crate::read_model::TenantStore;

/// Queryable product read model (catalog).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    /// All products of a tenant, ordered by SKU.
    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let mut products = self.store.list(tenant_id);
        products.sort_by(|a, b| a.sku.cmp(&b.sku).then_with(|| a.name.cmp(&b.name)));
        products
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != aggregate_types::PRODUCT {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if self.cursors.check(tenant_id, aggregate_id, seq)? == CursorCheck::Duplicate {
            return Ok(());
        }

        let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, product_id) = match &ev {
            ProductEvent::ProductCreated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductRenamed(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductArchived(e) => (e.tenant_id, e.product_id),
        };
        super::ensure_scoped(envelope, event_tenant, product_id.0)?;

        match ev {
            ProductEvent::ProductCreated(e) => {
                self.store.upsert(
                    tenant_id,
                    e.product_id,
                    ProductReadModel {
                        product_id: e.product_id,
                        sku: e.sku,
                        name: e.name,
                        category: e.category,
                        status: ProductStatus::Active,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            ProductEvent::ProductRenamed(e) => {
                let mut rm = self.existing(tenant_id, &e.product_id)?;
                rm.name = e.name;
                rm.updated_at = e.occurred_at;
                self.store.upsert(tenant_id, e.product_id, rm);
            }
            ProductEvent::ProductArchived(e) => {
                let mut rm = self.existing(tenant_id, &e.product_id)?;
                rm.status = ProductStatus::Archived;
                rm.updated_at = e.occurred_at;
                self.store.upsert(tenant_id, e.product_id, rm);
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    fn existing(
        &self,
        tenant_id: TenantId,
        product_id: &ProductId,
    ) -> Result<ProductReadModel, ProjectionError> {
        self.store
            .get(tenant_id, product_id)
            .ok_or_else(|| ProjectionError::MissingRecord(format!("product {product_id}")))
    }
}
