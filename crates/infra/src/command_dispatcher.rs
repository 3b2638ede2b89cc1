//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (tenant-scoped)
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (projections)
//! ```
//!
//! Two commands racing on the same stream both load version N; the store
//! accepts the first append and rejects the second with
//! `DispatchError::Concurrency`. Nothing is published for the loser.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use verdant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion, TenantId};
use verdant_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure or a domain-level conflict.
    #[error("conflict: {0}")]
    Concurrency(String),
    /// Cross-tenant or cross-aggregate stream mixing.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid operation: {0}")]
    InvariantViolation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(String),
    /// Historical payloads no longer match the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (events are persisted).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::TenantIsolation(msg) => DispatchError::TenantIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - Events are persisted before publication; a failed append publishes nothing.
/// - Every load is tenant-scoped and re-validated here, so a misbehaving
///   backend cannot leak another tenant's events into an aggregate.
/// - Publication failures surface as `DispatchError::Publish` after the events
///   are already durable (at-least-once for consumers).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `make_aggregate` builds the empty instance to rehydrate into (e.g.
    /// `Consignment::empty(id)`). Returns the committed events, which is empty
    /// when the command decided nothing.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: verdant_events::Event + Serialize + DeserializeOwned,
    {
        let (aggregate, loaded_version) =
            self.rehydrate(tenant_id, aggregate_id, make_aggregate)?;
        let expected = ExpectedVersion::Exact(loaded_version);

        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    tenant_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        debug!(
            tenant_id = %tenant_id,
            aggregate_id = %aggregate_id,
            aggregate_type = %aggregate_type,
            events = committed.len(),
            version = stream_version(&committed),
            "command committed"
        );

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Rehydrate an aggregate from its stream without handling a command.
    ///
    /// Used for authoritative reads (existence checks before a cross-aggregate
    /// command). A stream with no events yields the empty aggregate.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate + AggregateRoot,
        A::Event: DeserializeOwned,
    {
        let (aggregate, version) = self.rehydrate(tenant_id, aggregate_id, make_aggregate)?;
        debug_assert_eq!(aggregate.version(), version);
        Ok(aggregate)
    }

    fn rehydrate<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<(A, u64), DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(tenant_id, aggregate_id)?;
        validate_loaded_stream(tenant_id, aggregate_id, &history)?;

        let mut aggregate = make_aggregate(tenant_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok((aggregate, stream_version(&history)))
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::TenantIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    use verdant_events::InMemoryEventBus;
    use verdant_products::{CreateProduct, Product, ProductCommand, ProductId, RenameProduct};

    use crate::event_store::InMemoryEventStore;

    type Dispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> Dispatcher {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    fn create(tenant_id: TenantId, product_id: ProductId) -> ProductCommand {
        ProductCommand::CreateProduct(CreateProduct {
            tenant_id,
            product_id,
            sku: "OAT-1L".to_string(),
            name: "Oat drink 1L".to_string(),
            category: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn dispatch_persists_then_publishes() {
        let d = dispatcher();
        let sub = d.bus().subscribe();
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());

        let committed = d
            .dispatch(tenant_id, product_id.0, "products.product", create(tenant_id, product_id), |_, id| {
                Product::empty(ProductId::new(id))
            })
            .unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);
        let env = sub.try_recv().unwrap();
        assert_eq!(env.event_type(), "products.product.created");
        assert_eq!(env.tenant_id(), tenant_id);
    }

    #[test]
    fn domain_errors_are_mapped_and_nothing_is_stored() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());

        let err = d
            .dispatch(
                tenant_id,
                product_id.0,
                "products.product",
                ProductCommand::RenameProduct(RenameProduct {
                    tenant_id,
                    product_id,
                    name: "x".to_string(),
                    occurred_at: Utc::now(),
                }),
                |_, id| Product::empty(ProductId::new(id)),
            )
            .unwrap_err();

        assert!(matches!(err, DispatchError::NotFound(ref what) if what == "product"));
        assert!(d.store().load_stream(tenant_id, product_id.0).unwrap().is_empty());
    }

    #[test]
    fn load_rehydrates_current_state() {
        let d = dispatcher();
        let tenant_id = TenantId::new();
        let product_id = ProductId::new(AggregateId::new());
        d.dispatch(tenant_id, product_id.0, "products.product", create(tenant_id, product_id), |_, id| {
            Product::empty(ProductId::new(id))
        })
        .unwrap();

        let product: Product = d
            .load(tenant_id, product_id.0, |_, id| Product::empty(ProductId::new(id)))
            .unwrap();
        assert!(product.is_created());
        assert_eq!(product.version(), 1);

        let other_tenant: Product = d
            .load(TenantId::new(), product_id.0, |_, id| Product::empty(ProductId::new(id)))
            .unwrap();
        assert!(!other_tenant.is_created());
    }
}
