use std::collections::BTreeMap;
use std::sync::RwLock;

use verdant_core::{AggregateId, ExpectedVersion, TenantId};

use super::r#trait::{validate_batch, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// `(tenant, aggregate)` as raw bytes so streams iterate in a stable order.
type StreamKey = ([u8; 16], [u8; 16]);

fn stream_key(tenant_id: TenantId, aggregate_id: AggregateId) -> StreamKey {
    (*tenant_id.as_uuid().as_bytes(), *aggregate_id.as_uuid().as_bytes())
}

/// In-memory append-only event store.
///
/// The default backend. The write lock is held across the version check and the
/// push, so appends to one stream are serialized.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<BTreeMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Unavailable("lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let (tenant_id, aggregate_id, aggregate_type) = validate_batch(&events)?;

        let mut streams = self.streams.write().map_err(|_| Self::poisoned())?;

        let stream = streams
            .entry(stream_key(tenant_id, aggregate_id))
            .or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;
        Ok(streams
            .get(&stream_key(tenant_id, aggregate_id))
            .cloned()
            .unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::poisoned())?;
        Ok(streams.values().flatten().cloned().collect())
    }

    fn ping(&self) -> Result<(), EventStoreError> {
        self.streams.read().map(|_| ()).map_err(|_| Self::poisoned())
    }
}
