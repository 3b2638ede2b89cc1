use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use verdant_core::{Aggregate, AggregateRoot, Money, TenantId};
use verdant_consignment::{Consignment, ConsignmentEvent, ConsignmentId, ConsignmentStatus};
use verdant_events::EventEnvelope;

use super::cursor::{CursorCheck, StreamCursors};
use super::{aggregate_types, ProjectionError};
use crate::read_model::TenantStore;

/// Consignment read model: the folded consignment state plus bookkeeping.
///
/// Folding reuses the aggregate's own `apply`, so the read side can never
/// disagree with the write side about quantities or totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsignmentReadModel {
    pub consignment: Consignment,
    pub updated_at: DateTime<Utc>,
}

impl ConsignmentReadModel {
    pub fn version(&self) -> u64 {
        self.consignment.version()
    }
}

/// Tenant-wide totals across all consignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsignmentSummary {
    pub total: usize,
    /// Every status, in lifecycle order, with its count (zero included).
    pub by_status: Vec<(ConsignmentStatus, usize)>,
    pub total_sold: Money,
    pub store_amount: Money,
    pub owner_amount: Money,
}

#[derive(Debug)]
pub struct ConsignmentsProjection<S>
where
    S: TenantStore<ConsignmentId, ConsignmentReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ConsignmentsProjection<S>
where
    S: TenantStore<ConsignmentId, ConsignmentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        consignment_id: &ConsignmentId,
    ) -> Option<ConsignmentReadModel> {
        self.store.get(tenant_id, consignment_id)
    }

    /// Newest first, optionally restricted to one status.
    pub fn list(
        &self,
        tenant_id: TenantId,
        status: Option<ConsignmentStatus>,
    ) -> Vec<ConsignmentReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|rm| status.is_none_or(|s| rm.consignment.status() == s))
            .collect();
        rows.sort_by(|a, b| {
            b.consignment
                .created_at()
                .cmp(&a.consignment.created_at())
                .then_with(|| b.consignment.number().cmp(a.consignment.number()))
        });
        rows
    }

    pub fn summary(&self, tenant_id: TenantId) -> ConsignmentSummary {
        let rows = self.store.list(tenant_id);

        let by_status = ConsignmentStatus::ALL
            .into_iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .filter(|rm| rm.consignment.status() == status)
                    .count();
                (status, count)
            })
            .collect();

        ConsignmentSummary {
            total: rows.len(),
            by_status,
            total_sold: rows.iter().map(|rm| rm.consignment.total_sold()).sum(),
            store_amount: rows.iter().map(|rm| rm.consignment.store_due()).sum(),
            owner_amount: rows.iter().map(|rm| rm.consignment.owner_due()).sum(),
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != aggregate_types::CONSIGNMENT {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if self.cursors.check(tenant_id, aggregate_id, seq)? == CursorCheck::Duplicate {
            return Ok(());
        }

        let ev: ConsignmentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_tenant, consignment_id) = match &ev {
            ConsignmentEvent::ConsignmentCreated(e) => (e.tenant_id, e.consignment_id),
            ConsignmentEvent::SaleRegistered(e) => (e.tenant_id, e.consignment_id),
            ConsignmentEvent::ItemsReturned(e) => (e.tenant_id, e.consignment_id),
            ConsignmentEvent::ConsignmentPartiallySettled(e) => (e.tenant_id, e.consignment_id),
            ConsignmentEvent::ConsignmentReturned(e) => (e.tenant_id, e.consignment_id),
            ConsignmentEvent::ConsignmentSettled(e) => (e.tenant_id, e.consignment_id),
            ConsignmentEvent::ConsignmentCancelled(e) => (e.tenant_id, e.consignment_id),
            ConsignmentEvent::ConsignmentExpired(e) => (e.tenant_id, e.consignment_id),
        };
        super::ensure_scoped(envelope, event_tenant, consignment_id.0)?;

        let mut consignment = match (&ev, self.store.get(tenant_id, &consignment_id)) {
            (ConsignmentEvent::ConsignmentCreated(_), _) => Consignment::empty(consignment_id),
            (_, Some(rm)) => rm.consignment,
            (_, None) => {
                return Err(ProjectionError::MissingRecord(format!(
                    "consignment {consignment_id}"
                )));
            }
        };
        consignment.apply(&ev);

        self.store.upsert(
            tenant_id,
            consignment_id,
            ConsignmentReadModel {
                consignment,
                updated_at: envelope.occurred_at(),
            },
        );

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }
}
