//! Projection implementations (read model builders).
//!
//! Projections consume envelopes from the bus and build query-optimized read
//! models. All projections are:
//! - **Rebuildable**: reconstructed from the event store at startup
//! - **Tenant-isolated**: data is partitioned by tenant
//! - **Idempotent**: redelivered envelopes are skipped by sequence number
//! - **Ordered**: an envelope that arrives ahead of its predecessor is parked
//!   until the gap is filled

pub mod consignments;
pub mod cursor;
pub mod products;
pub mod tenants;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};

use verdant_consignment::ConsignmentId;
use verdant_core::{AggregateId, TenantId};
use verdant_events::EventEnvelope;
use verdant_products::ProductId;
use verdant_tenants::TenantProfileId;

use crate::event_store::StoredEvent;
use crate::read_model::InMemoryTenantStore;

pub use consignments::{ConsignmentReadModel, ConsignmentSummary, ConsignmentsProjection};
pub use products::{ProductCatalogProjection, ProductReadModel};
pub use tenants::{TenantDirectoryProjection, TenantReadModel};

/// Stream type names, stored with every event.
pub mod aggregate_types {
    pub const TENANT_PROFILE: &str = "tenants.profile";
    pub const PRODUCT: &str = "products.product";
    pub const CONSIGNMENT: &str = "consignment.consignment";
    pub const CONSIGNMENT_SEQUENCE: &str = "consignment.sequence";
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("read model record missing: {0}")]
    MissingRecord(String),
}

/// The payload must agree with the envelope about tenant and stream.
fn ensure_scoped(
    envelope: &EventEnvelope<JsonValue>,
    event_tenant: TenantId,
    event_aggregate: AggregateId,
) -> Result<(), ProjectionError> {
    if event_tenant != envelope.tenant_id() {
        return Err(ProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    if event_aggregate != envelope.aggregate_id() {
        return Err(ProjectionError::TenantIsolation(
            "event aggregate id does not match envelope aggregate_id".to_string(),
        ));
    }
    Ok(())
}

pub type TenantDirectory =
    TenantDirectoryProjection<Arc<InMemoryTenantStore<TenantProfileId, TenantReadModel>>>;
pub type ProductCatalog =
    ProductCatalogProjection<Arc<InMemoryTenantStore<ProductId, ProductReadModel>>>;
pub type ConsignmentLedger =
    ConsignmentsProjection<Arc<InMemoryTenantStore<ConsignmentId, ConsignmentReadModel>>>;

type StreamKey = (TenantId, AggregateId);

/// Envelopes received ahead of their predecessor, per stream.
type Parked = HashMap<StreamKey, BTreeMap<u64, EventEnvelope<JsonValue>>>;

/// Every read model of the service, fed from one envelope stream.
///
/// Commits on one stream can reach the bus out of order when two writers
/// race. Early envelopes wait in `parked` and are applied once the missing
/// sequence numbers arrive.
#[derive(Debug)]
pub struct ReadModels {
    pub tenants: TenantDirectory,
    pub products: ProductCatalog,
    pub consignments: ConsignmentLedger,
    parked: Mutex<Parked>,
}

impl Default for ReadModels {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadModels {
    pub fn new() -> Self {
        Self {
            tenants: TenantDirectoryProjection::new(Arc::new(InMemoryTenantStore::new())),
            products: ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new())),
            consignments: ConsignmentsProjection::new(Arc::new(InMemoryTenantStore::new())),
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Apply an envelope, parking it if earlier events of its stream have not
    /// arrived yet, then apply whatever it unblocks.
    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let mut parked = self
            .parked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (envelope.tenant_id(), envelope.aggregate_id());

        match self.route(envelope) {
            Err(ProjectionError::NonMonotonicSequence { last, found }) if found > last + 1 => {
                debug!(
                    aggregate_id = %envelope.aggregate_id(),
                    last,
                    found,
                    "parking out-of-order event"
                );
                parked
                    .entry(key)
                    .or_default()
                    .insert(found, envelope.clone());
                return Ok(());
            }
            other => other?,
        }

        self.drain_parked(&mut parked, key)
    }

    #[cfg(test)]
    pub(crate) fn parked_len(&self) -> usize {
        self.parked
            .lock()
            .map(|p| p.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    fn drain_parked(&self, parked: &mut Parked, key: StreamKey) -> Result<(), ProjectionError> {
        let Some(waiting) = parked.get_mut(&key) else {
            return Ok(());
        };

        let result = loop {
            let Some((seq, next)) = waiting.pop_first() else {
                break Ok(());
            };
            match self.route(&next) {
                Ok(()) => {}
                Err(ProjectionError::NonMonotonicSequence { last, found }) if found > last + 1 => {
                    waiting.insert(seq, next);
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        if waiting.is_empty() {
            parked.remove(&key);
        }
        result
    }

    /// Route an envelope to the projection for its aggregate type.
    fn route(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        match envelope.aggregate_type() {
            aggregate_types::TENANT_PROFILE => self.tenants.apply_envelope(envelope),
            aggregate_types::PRODUCT => self.products.apply_envelope(envelope),
            aggregate_types::CONSIGNMENT => self.consignments.apply_envelope(envelope),
            _ => Ok(()),
        }
    }

    /// Clear every tenant present in `events` and replay them in stream order.
    pub fn rebuild(&self, events: &[StoredEvent]) -> Result<usize, ProjectionError> {
        let mut tenants: Vec<TenantId> = events.iter().map(|e| e.tenant_id).collect();
        tenants.sort_by_key(|t| *t.as_uuid().as_bytes());
        tenants.dedup();
        if let Ok(mut parked) = self.parked.lock() {
            parked.retain(|(t, _), _| !tenants.contains(t));
        }
        for tenant_id in &tenants {
            self.tenants.clear_tenant(*tenant_id);
            self.products.clear_tenant(*tenant_id);
            self.consignments.clear_tenant(*tenant_id);
        }

        let mut ordered: Vec<&StoredEvent> = events.iter().collect();
        ordered.sort_by_key(|e| {
            (
                *e.tenant_id.as_uuid().as_bytes(),
                *e.aggregate_id.as_uuid().as_bytes(),
                e.sequence_number,
            )
        });

        for stored in &ordered {
            self.apply(&stored.to_envelope())?;
        }

        info!(tenants = tenants.len(), events = ordered.len(), "read models rebuilt");
        Ok(ordered.len())
    }
}
