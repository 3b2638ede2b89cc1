//! Consignment application service.
//!
//! Creation touches three kinds of streams: the tenant profile and products
//! (read for existence), the per-year number sequence (written), and the new
//! consignment (written). Each write is its own optimistic append; the
//! consignment itself, header and items, is one event.

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use verdant_consignment::{
    Consignment, ConsignmentCommand, ConsignmentId, ConsignmentItemId, ConsignmentSequence,
    ConsignmentSequenceId, CreateConsignment, NewConsignmentItem, ReserveNumber, SequenceCommand,
    SequenceEvent,
};
use verdant_core::{Aggregate, AggregateId, Money, Percentage, TenantId};
use verdant_events::{EventBus, EventEnvelope};
use verdant_products::{Product, ProductId};
use verdant_tenants::{TenantProfile, TenantProfileId};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::aggregate_types;

/// Attempts at reserving a number before the conflict is returned to the caller.
pub const NUMBER_RESERVATION_ATTEMPTS: u32 = 3;

const PENDING_NUMBER: &str = "CONS-PENDING";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConsignmentLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub cost_price: Money,
    pub retail_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConsignment {
    pub tenant_id: TenantId,
    pub expires_at: Option<DateTime<Utc>>,
    pub store_percentage: Percentage,
    pub owner_percentage: Percentage,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<NewConsignmentLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedConsignment {
    pub consignment_id: ConsignmentId,
    pub number: String,
    pub item_ids: Vec<ConsignmentItemId>,
    pub committed: Vec<StoredEvent>,
}

/// The tenant's profile must be registered and active.
pub fn ensure_tenant_active<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
) -> Result<(), DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let profile_id = TenantProfileId::for_tenant(tenant_id);
    let profile: TenantProfile =
        dispatcher.load(tenant_id, profile_id.0, |_, id| TenantProfile::empty(TenantProfileId(id)))?;

    if !profile.is_registered() {
        return Err(DispatchError::NotFound("tenant".to_string()));
    }
    if !profile.is_active() {
        return Err(DispatchError::InvariantViolation(
            "tenant is suspended".to_string(),
        ));
    }
    Ok(())
}

fn ensure_products_consignable<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    lines: &[NewConsignmentLine],
) -> Result<(), DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    for line in lines {
        let product: Product = dispatcher.load(tenant_id, line.product_id.0, |_, id| {
            Product::empty(ProductId::new(id))
        })?;
        if !product.is_created() {
            return Err(DispatchError::NotFound(format!("product {}", line.product_id)));
        }
        if !product.can_be_consigned() {
            return Err(DispatchError::InvariantViolation(format!(
                "product {} is archived and cannot be consigned",
                line.product_id
            )));
        }
    }
    Ok(())
}

/// Reserve the next `CONS-<year>-<seq>` number, retrying lost races.
pub fn reserve_number<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    at: DateTime<Utc>,
) -> Result<String, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let year = at.year();
    let sequence_id = ConsignmentSequenceId::for_year(tenant_id, year);
    let mut attempt = 1;

    loop {
        let result = dispatcher.dispatch::<ConsignmentSequence>(
            tenant_id,
            sequence_id.0,
            aggregate_types::CONSIGNMENT_SEQUENCE,
            SequenceCommand::ReserveNumber(ReserveNumber {
                tenant_id,
                year,
                occurred_at: at,
            }),
            |_, id| ConsignmentSequence::empty(ConsignmentSequenceId(id)),
        );

        match result {
            Ok(committed) => {
                let stored = committed.first().ok_or_else(|| {
                    DispatchError::InvariantViolation("number reservation produced no event".to_string())
                })?;
                let SequenceEvent::NumberReserved(reserved) =
                    serde_json::from_value::<SequenceEvent>(stored.payload.clone())
                        .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
                return Ok(reserved.number());
            }
            Err(DispatchError::Concurrency(reason)) if attempt < NUMBER_RESERVATION_ATTEMPTS => {
                debug!(tenant_id = %tenant_id, attempt, %reason, "number reservation raced, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Create a consignment with its items.
///
/// Order matters: everything that can be rejected is checked before a number
/// is reserved, so validation failures do not leave gaps in the sequence.
pub fn create_consignment<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    input: NewConsignment,
) -> Result<CreatedConsignment, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let tenant_id = input.tenant_id;
    ensure_tenant_active(dispatcher, tenant_id)?;

    let consignment_id = ConsignmentId::new(AggregateId::new());
    let items: Vec<NewConsignmentItem> = input
        .items
        .iter()
        .map(|line| NewConsignmentItem {
            item_id: ConsignmentItemId::new(AggregateId::new()),
            product_id: line.product_id,
            quantity: line.quantity,
            cost_price: line.cost_price,
            retail_price: line.retail_price,
        })
        .collect();
    let item_ids = items.iter().map(|i| i.item_id).collect();

    let mut create = CreateConsignment {
        tenant_id,
        consignment_id,
        number: PENDING_NUMBER.to_string(),
        expires_at: input.expires_at,
        store_percentage: input.store_percentage,
        owner_percentage: input.owner_percentage,
        notes: input.notes,
        terms: input.terms,
        items,
        occurred_at: input.occurred_at,
    };

    // Dry run of the aggregate's own validation.
    Consignment::empty(consignment_id)
        .handle(&ConsignmentCommand::CreateConsignment(create.clone()))
        .map_err(DispatchError::from)?;
    ensure_products_consignable(dispatcher, tenant_id, &input.items)?;

    create.number = reserve_number(dispatcher, tenant_id, input.occurred_at)?;
    let number = create.number.clone();

    let committed = dispatcher.dispatch::<Consignment>(
        tenant_id,
        consignment_id.0,
        aggregate_types::CONSIGNMENT,
        ConsignmentCommand::CreateConsignment(create),
        |_, id| Consignment::empty(ConsignmentId::new(id)),
    )?;

    info!(tenant_id = %tenant_id, consignment_id = %consignment_id, %number, "consignment created");

    Ok(CreatedConsignment {
        consignment_id,
        number,
        item_ids,
        committed,
    })
}

/// Dispatch any other consignment command (sale, return, settle, cancel, expire).
///
/// Sales additionally require an active tenant.
pub fn execute_consignment_command<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    tenant_id: TenantId,
    consignment_id: ConsignmentId,
    command: ConsignmentCommand,
) -> Result<Vec<StoredEvent>, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    if matches!(command, ConsignmentCommand::RegisterSale(_)) {
        ensure_tenant_active(dispatcher, tenant_id)?;
    }

    dispatcher.dispatch::<Consignment>(
        tenant_id,
        consignment_id.0,
        aggregate_types::CONSIGNMENT,
        command,
        |_, id| Consignment::empty(ConsignmentId::new(id)),
    )
}
