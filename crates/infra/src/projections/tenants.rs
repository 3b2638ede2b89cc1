use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use verdant_core::TenantId;
use verdant_events::EventEnvelope;
use verdant_tenants::{TenantEvent, TenantProfileId, TenantStatus};

use super::cursor::{CursorCheck, StreamCursors};
use super::{aggregate_types, ProjectionError};
use crate::read_model::TenantStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantReadModel {
    pub tenant_id: TenantId,
    pub name: String,
    pub contact_email: Option<String>,
    pub status: TenantStatus,
    pub suspension_reason: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// One record per tenant, keyed by its profile stream.
#[derive(Debug)]
pub struct TenantDirectoryProjection<S>
where
    S: TenantStore<TenantProfileId, TenantReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> TenantDirectoryProjection<S>
where
    S: TenantStore<TenantProfileId, TenantReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId) -> Option<TenantReadModel> {
        self.store.get(tenant_id, &TenantProfileId::for_tenant(tenant_id))
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != aggregate_types::TENANT_PROFILE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        if self.cursors.check(tenant_id, aggregate_id, seq)? == CursorCheck::Duplicate {
            return Ok(());
        }

        let ev: TenantEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let event_tenant = match &ev {
            TenantEvent::TenantRegistered(e) => e.tenant_id,
            TenantEvent::TenantSuspended(e) => e.tenant_id,
            TenantEvent::TenantReactivated(e) => e.tenant_id,
        };
        let profile_id = TenantProfileId::for_tenant(event_tenant);
        super::ensure_scoped(envelope, event_tenant, profile_id.0)?;

        match ev {
            TenantEvent::TenantRegistered(e) => {
                self.store.upsert(
                    tenant_id,
                    profile_id,
                    TenantReadModel {
                        tenant_id,
                        name: e.name,
                        contact_email: e.contact_email,
                        status: TenantStatus::Active,
                        suspension_reason: None,
                        registered_at: e.occurred_at,
                    },
                );
            }
            TenantEvent::TenantSuspended(e) => {
                let mut rm = self.existing(tenant_id)?;
                rm.status = TenantStatus::Suspended;
                rm.suspension_reason = e.reason;
                self.store.upsert(tenant_id, profile_id, rm);
            }
            TenantEvent::TenantReactivated(_) => {
                let mut rm = self.existing(tenant_id)?;
                rm.status = TenantStatus::Active;
                rm.suspension_reason = None;
                self.store.upsert(tenant_id, profile_id, rm);
            }
        }

        self.cursors.advance(tenant_id, aggregate_id, seq);
        Ok(())
    }

    fn existing(&self, tenant_id: TenantId) -> Result<TenantReadModel, ProjectionError> {
        self.get(tenant_id)
            .ok_or_else(|| ProjectionError::MissingRecord(format!("tenant {tenant_id}")))
    }
}
