use std::collections::HashMap;
use std::sync::RwLock;

use verdant_core::{AggregateId, TenantId};

use super::ProjectionError;

/// What a projection should do with an incoming envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCheck {
    Apply,
    /// Already applied (at-least-once redelivery or rebuild overlap).
    Duplicate,
}

/// Last applied sequence number per stream.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.get(&(tenant_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    /// Streams must be applied gap-free, starting at 1.
    pub fn check(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
    ) -> Result<CursorCheck, ProjectionError> {
        let last = self.last(tenant_id, aggregate_id);
        if seq == 0 || seq > last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorCheck::Duplicate);
        }
        Ok(CursorCheck::Apply)
    }

    pub fn advance(&self, tenant_id: TenantId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert((tenant_id, aggregate_id), seq);
        }
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }
    }
}
