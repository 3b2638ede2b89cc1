use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdant_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, Money, Percentage, TenantId,
};
use verdant_events::Event;
use verdant_products::ProductId;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub AggregateId);

        impl $name {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

typed_id!(
    /// Consignment identifier (the aggregate stream id).
    ConsignmentId
);
typed_id!(
    /// Line item identifier, unique within its consignment.
    ConsignmentItemId
);
typed_id!(
    /// Sale identifier, unique within its consignment.
    SaleId
);

/// Consignment status lifecycle.
///
/// ```text
/// Active ──sale exhausts stock──▶ PartiallySettled ──settle──▶ Settled
///   │  ╲                              │
///   │   ╲──expire──▶ Expired ◀──expire┘
///   │                  │  ╲──settle──▶ Settled
///   │                  ╰──all returned, none sold──▶ Returned
///   ╰──cancel (no sales)──▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsignmentStatus {
    Active,
    PartiallySettled,
    Settled,
    Expired,
    Returned,
    Cancelled,
}

impl ConsignmentStatus {
    pub const ALL: [ConsignmentStatus; 6] = [
        ConsignmentStatus::Active,
        ConsignmentStatus::PartiallySettled,
        ConsignmentStatus::Settled,
        ConsignmentStatus::Expired,
        ConsignmentStatus::Returned,
        ConsignmentStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConsignmentStatus::Active => "active",
            ConsignmentStatus::PartiallySettled => "partially_settled",
            ConsignmentStatus::Settled => "settled",
            ConsignmentStatus::Expired => "expired",
            ConsignmentStatus::Returned => "returned",
            ConsignmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn accepts_sales(self) -> bool {
        matches!(
            self,
            ConsignmentStatus::Active | ConsignmentStatus::PartiallySettled
        )
    }

    pub fn accepts_returns(self) -> bool {
        matches!(
            self,
            ConsignmentStatus::Active
                | ConsignmentStatus::PartiallySettled
                | ConsignmentStatus::Expired
        )
    }
}

impl core::fmt::Display for ConsignmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ConsignmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsignmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown consignment status '{s}'")))
    }
}

/// A product line placed on consignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentItem {
    pub item_id: ConsignmentItemId,
    pub product_id: ProductId,
    pub quantity_consigned: u32,
    pub quantity_sold: u32,
    pub quantity_returned: u32,
    pub cost_price: Money,
    pub retail_price: Money,
}

impl ConsignmentItem {
    /// `consigned - sold - returned`; never negative by construction.
    pub fn quantity_available(&self) -> u32 {
        self.quantity_consigned
            .saturating_sub(self.quantity_sold)
            .saturating_sub(self.quantity_returned)
    }
}

/// An immutable sale record against one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentSale {
    pub sale_id: SaleId,
    pub item_id: ConsignmentItemId,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
    pub store_amount: Money,
    pub owner_amount: Money,
    pub sold_at: DateTime<Utc>,
}

/// Aggregate root: Consignment (header, items and sales in one stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consignment {
    id: ConsignmentId,
    tenant_id: Option<TenantId>,
    number: String,
    created_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    status: ConsignmentStatus,
    store_percentage: Percentage,
    owner_percentage: Percentage,
    notes: Option<String>,
    terms: Option<String>,
    settlement_notes: Option<String>,
    items: Vec<ConsignmentItem>,
    sales: Vec<ConsignmentSale>,
    total_sold: Money,
    store_due: Money,
    owner_due: Money,
    version: u64,
    created: bool,
}

impl Consignment {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ConsignmentId) -> Self {
        Self {
            id,
            tenant_id: None,
            number: String::new(),
            created_at: None,
            expires_at: None,
            status: ConsignmentStatus::Active,
            store_percentage: Percentage::default(),
            owner_percentage: Percentage::default(),
            notes: None,
            terms: None,
            settlement_notes: None,
            items: Vec::new(),
            sales: Vec::new(),
            total_sold: Money::ZERO,
            store_due: Money::ZERO,
            owner_due: Money::ZERO,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ConsignmentId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn status(&self) -> ConsignmentStatus {
        self.status
    }

    pub fn store_percentage(&self) -> Percentage {
        self.store_percentage
    }

    pub fn owner_percentage(&self) -> Percentage {
        self.owner_percentage
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn terms(&self) -> Option<&str> {
        self.terms.as_deref()
    }

    pub fn settlement_notes(&self) -> Option<&str> {
        self.settlement_notes.as_deref()
    }

    pub fn items(&self) -> &[ConsignmentItem] {
        &self.items
    }

    pub fn item(&self, item_id: ConsignmentItemId) -> Option<&ConsignmentItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    pub fn sales(&self) -> &[ConsignmentSale] {
        &self.sales
    }

    pub fn total_sold(&self) -> Money {
        self.total_sold
    }

    pub fn store_due(&self) -> Money {
        self.store_due
    }

    pub fn owner_due(&self) -> Money {
        self.owner_due
    }

    /// True when taking `taken` units from `item_id` leaves nothing available anywhere.
    fn exhausted_after(&self, item_id: ConsignmentItemId, taken: u32) -> bool {
        self.items.iter().all(|i| {
            let available = i.quantity_available();
            if i.item_id == item_id {
                available.saturating_sub(taken) == 0
            } else {
                available == 0
            }
        })
    }
}

impl AggregateRoot for Consignment {
    type Id = ConsignmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// A line of a `CreateConsignment` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConsignmentItem {
    pub item_id: ConsignmentItemId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub cost_price: Money,
    pub retail_price: Money,
}

/// Command: CreateConsignment.
///
/// The number is reserved beforehand from the tenant's yearly sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConsignment {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub number: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub store_percentage: Percentage,
    pub owner_percentage: Percentage,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<NewConsignmentItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterSale. `occurred_at` is the sale time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSale {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub sale_id: SaleId,
    pub item_id: ConsignmentItemId,
    pub quantity: i64,
    pub unit_price: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnItems (unsold goods going back to the owner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItems {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub item_id: ConsignmentItemId,
    pub quantity: i64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SettleConsignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleConsignment {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelConsignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelConsignment {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireConsignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireConsignment {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsignmentCommand {
    CreateConsignment(CreateConsignment),
    RegisterSale(RegisterSale),
    ReturnItems(ReturnItems),
    SettleConsignment(SettleConsignment),
    CancelConsignment(CancelConsignment),
    ExpireConsignment(ExpireConsignment),
}

/// Event: ConsignmentCreated (header and all items, one atomic append).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentCreated {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub number: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub store_percentage: Percentage,
    pub owner_percentage: Percentage,
    pub notes: Option<String>,
    pub terms: Option<String>,
    pub items: Vec<ConsignmentItem>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SaleRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRegistered {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub sale_id: SaleId,
    pub item_id: ConsignmentItemId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub total: Money,
    pub store_amount: Money,
    pub owner_amount: Money,
    pub sold_at: DateTime<Utc>,
}

/// Event: ItemsReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsReturned {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub item_id: ConsignmentItemId,
    pub quantity: u32,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ConsignmentPartiallySettled (all stock sold or returned, awaiting settlement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentPartiallySettled {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ConsignmentReturned (everything went back unsold).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentReturned {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ConsignmentSettled, carrying the final amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentSettled {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub notes: Option<String>,
    pub total_sold: Money,
    pub store_amount: Money,
    pub owner_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ConsignmentCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentCancelled {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ConsignmentExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsignmentExpired {
    pub tenant_id: TenantId,
    pub consignment_id: ConsignmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsignmentEvent {
    ConsignmentCreated(ConsignmentCreated),
    SaleRegistered(SaleRegistered),
    ItemsReturned(ItemsReturned),
    ConsignmentPartiallySettled(ConsignmentPartiallySettled),
    ConsignmentReturned(ConsignmentReturned),
    ConsignmentSettled(ConsignmentSettled),
    ConsignmentCancelled(ConsignmentCancelled),
    ConsignmentExpired(ConsignmentExpired),
}

impl Event for ConsignmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ConsignmentEvent::ConsignmentCreated(_) => "consignment.consignment.created",
            ConsignmentEvent::SaleRegistered(_) => "consignment.sale.registered",
            ConsignmentEvent::ItemsReturned(_) => "consignment.items.returned",
            ConsignmentEvent::ConsignmentPartiallySettled(_) => {
                "consignment.consignment.partially_settled"
            }
            ConsignmentEvent::ConsignmentReturned(_) => "consignment.consignment.returned",
            ConsignmentEvent::ConsignmentSettled(_) => "consignment.consignment.settled",
            ConsignmentEvent::ConsignmentCancelled(_) => "consignment.consignment.cancelled",
            ConsignmentEvent::ConsignmentExpired(_) => "consignment.consignment.expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ConsignmentEvent::ConsignmentCreated(e) => e.occurred_at,
            ConsignmentEvent::SaleRegistered(e) => e.sold_at,
            ConsignmentEvent::ItemsReturned(e) => e.occurred_at,
            ConsignmentEvent::ConsignmentPartiallySettled(e) => e.occurred_at,
            ConsignmentEvent::ConsignmentReturned(e) => e.occurred_at,
            ConsignmentEvent::ConsignmentSettled(e) => e.occurred_at,
            ConsignmentEvent::ConsignmentCancelled(e) => e.occurred_at,
            ConsignmentEvent::ConsignmentExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Consignment {
    type Command = ConsignmentCommand;
    type Event = ConsignmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ConsignmentEvent::ConsignmentCreated(e) => {
                self.id = e.consignment_id;
                self.tenant_id = Some(e.tenant_id);
                self.number = e.number.clone();
                self.created_at = Some(e.occurred_at);
                self.expires_at = e.expires_at;
                self.status = ConsignmentStatus::Active;
                self.store_percentage = e.store_percentage;
                self.owner_percentage = e.owner_percentage;
                self.notes = e.notes.clone();
                self.terms = e.terms.clone();
                self.items = e.items.clone();
                self.sales.clear();
                self.total_sold = Money::ZERO;
                self.store_due = Money::ZERO;
                self.owner_due = Money::ZERO;
                self.created = true;
            }
            ConsignmentEvent::SaleRegistered(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.item_id == e.item_id) {
                    item.quantity_sold += e.quantity;
                }
                self.sales.push(ConsignmentSale {
                    sale_id: e.sale_id,
                    item_id: e.item_id,
                    quantity: e.quantity,
                    unit_price: e.unit_price,
                    total: e.total,
                    store_amount: e.store_amount,
                    owner_amount: e.owner_amount,
                    sold_at: e.sold_at,
                });
                // Overflow was ruled out when the sale was decided.
                self.total_sold = Money::from_cents(self.total_sold.cents().saturating_add(e.total.cents()));
                self.store_due =
                    Money::from_cents(self.store_due.cents().saturating_add(e.store_amount.cents()));
                self.owner_due =
                    Money::from_cents(self.owner_due.cents().saturating_add(e.owner_amount.cents()));
            }
            ConsignmentEvent::ItemsReturned(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.item_id == e.item_id) {
                    item.quantity_returned += e.quantity;
                }
            }
            ConsignmentEvent::ConsignmentPartiallySettled(_) => {
                self.status = ConsignmentStatus::PartiallySettled;
            }
            ConsignmentEvent::ConsignmentReturned(_) => {
                self.status = ConsignmentStatus::Returned;
            }
            ConsignmentEvent::ConsignmentSettled(e) => {
                self.status = ConsignmentStatus::Settled;
                self.settlement_notes = e.notes.clone();
            }
            ConsignmentEvent::ConsignmentCancelled(_) => {
                self.status = ConsignmentStatus::Cancelled;
            }
            ConsignmentEvent::ConsignmentExpired(_) => {
                self.status = ConsignmentStatus::Expired;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ConsignmentCommand::CreateConsignment(cmd) => self.handle_create(cmd),
            ConsignmentCommand::RegisterSale(cmd) => self.handle_register_sale(cmd),
            ConsignmentCommand::ReturnItems(cmd) => self.handle_return_items(cmd),
            ConsignmentCommand::SettleConsignment(cmd) => self.handle_settle(cmd),
            ConsignmentCommand::CancelConsignment(cmd) => self.handle_cancel(cmd),
            ConsignmentCommand::ExpireConsignment(cmd) => self.handle_expire(cmd),
        }
    }
}

fn non_blank(text: &Option<String>) -> Option<String> {
    text.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn positive_quantity(quantity: i64) -> Result<u32, DomainError> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    u32::try_from(quantity).map_err(|_| DomainError::validation("quantity is too large"))
}

impl Consignment {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_consignment_id(&self, consignment_id: ConsignmentId) -> Result<(), DomainError> {
        if self.id != consignment_id {
            return Err(DomainError::invariant("consignment_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(
        &self,
        tenant_id: TenantId,
        consignment_id: ConsignmentId,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("consignment"));
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_consignment_id(consignment_id)
    }

    fn handle_create(
        &self,
        cmd: &CreateConsignment,
    ) -> Result<Vec<ConsignmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("consignment already exists"));
        }
        self.ensure_consignment_id(cmd.consignment_id)?;

        let number = cmd.number.trim();
        if number.is_empty() {
            return Err(DomainError::validation("consignment number cannot be empty"));
        }

        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "a consignment needs at least one item",
            ));
        }

        Percentage::validate_split(cmd.owner_percentage, cmd.store_percentage)?;

        if let Some(expires_at) = cmd.expires_at {
            if expires_at <= cmd.occurred_at {
                return Err(DomainError::validation(
                    "expiry date must be after the creation date",
                ));
            }
        }

        let mut item_ids = HashSet::new();
        let mut product_ids = HashSet::new();
        let mut items = Vec::with_capacity(cmd.items.len());

        for (idx, line) in cmd.items.iter().enumerate() {
            let quantity = positive_quantity(line.quantity)
                .map_err(|_| DomainError::validation(format!("item {idx}: quantity must be positive")))?;
            if line.cost_price.is_zero() {
                return Err(DomainError::validation(format!(
                    "item {idx}: cost price must be positive"
                )));
            }
            if line.retail_price.is_zero() {
                return Err(DomainError::validation(format!(
                    "item {idx}: retail price must be positive"
                )));
            }
            if line.retail_price < line.cost_price {
                return Err(DomainError::validation(format!(
                    "item {idx}: retail price cannot be below cost price"
                )));
            }
            if !item_ids.insert(line.item_id) {
                return Err(DomainError::validation(format!(
                    "item {idx}: duplicate item id"
                )));
            }
            if !product_ids.insert(line.product_id) {
                return Err(DomainError::validation(format!(
                    "item {idx}: product {} is already on this consignment",
                    line.product_id
                )));
            }

            items.push(ConsignmentItem {
                item_id: line.item_id,
                product_id: line.product_id,
                quantity_consigned: quantity,
                quantity_sold: 0,
                quantity_returned: 0,
                cost_price: line.cost_price,
                retail_price: line.retail_price,
            });
        }

        Ok(vec![ConsignmentEvent::ConsignmentCreated(ConsignmentCreated {
            tenant_id: cmd.tenant_id,
            consignment_id: cmd.consignment_id,
            number: number.to_string(),
            expires_at: cmd.expires_at,
            store_percentage: cmd.store_percentage,
            owner_percentage: cmd.owner_percentage,
            notes: non_blank(&cmd.notes),
            terms: non_blank(&cmd.terms),
            items,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_sale(
        &self,
        cmd: &RegisterSale,
    ) -> Result<Vec<ConsignmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.consignment_id)?;

        if !self.status.accepts_sales() {
            return Err(DomainError::invariant(format!(
                "cannot register a sale on a {} consignment",
                self.status
            )));
        }

        let quantity = positive_quantity(cmd.quantity)?;
        if cmd.unit_price.is_zero() {
            return Err(DomainError::validation("unit price must be positive"));
        }

        if let Some(expires_at) = self.expires_at {
            if cmd.occurred_at > expires_at {
                return Err(DomainError::invariant(
                    "sale date is past the consignment expiry date",
                ));
            }
        }

        if self.sales.iter().any(|s| s.sale_id == cmd.sale_id) {
            return Err(DomainError::conflict("sale already registered"));
        }

        let item = self
            .item(cmd.item_id)
            .ok_or_else(|| DomainError::not_found("consignment item"))?;

        let available = item.quantity_available();
        if quantity > available {
            return Err(DomainError::invariant(format!(
                "requested quantity {quantity} exceeds available quantity {available}"
            )));
        }

        let total = cmd.unit_price.checked_mul(quantity)?;
        self.total_sold.checked_add(total)?;
        let split = total.split(self.owner_percentage);

        let mut events = vec![ConsignmentEvent::SaleRegistered(SaleRegistered {
            tenant_id: cmd.tenant_id,
            consignment_id: cmd.consignment_id,
            sale_id: cmd.sale_id,
            item_id: cmd.item_id,
            product_id: item.product_id,
            quantity,
            unit_price: cmd.unit_price,
            total: split.total,
            store_amount: split.store,
            owner_amount: split.owner,
            sold_at: cmd.occurred_at,
        })];

        if self.status == ConsignmentStatus::Active && self.exhausted_after(cmd.item_id, quantity) {
            events.push(ConsignmentEvent::ConsignmentPartiallySettled(
                ConsignmentPartiallySettled {
                    tenant_id: cmd.tenant_id,
                    consignment_id: cmd.consignment_id,
                    occurred_at: cmd.occurred_at,
                },
            ));
        }

        Ok(events)
    }

    fn handle_return_items(
        &self,
        cmd: &ReturnItems,
    ) -> Result<Vec<ConsignmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.consignment_id)?;

        if !self.status.accepts_returns() {
            return Err(DomainError::invariant(format!(
                "cannot return items of a {} consignment",
                self.status
            )));
        }

        let quantity = positive_quantity(cmd.quantity)?;

        let item = self
            .item(cmd.item_id)
            .ok_or_else(|| DomainError::not_found("consignment item"))?;

        let available = item.quantity_available();
        if quantity > available {
            return Err(DomainError::invariant(format!(
                "cannot return {quantity} units, only {available} available"
            )));
        }

        let mut events = vec![ConsignmentEvent::ItemsReturned(ItemsReturned {
            tenant_id: cmd.tenant_id,
            consignment_id: cmd.consignment_id,
            item_id: cmd.item_id,
            quantity,
            reason: non_blank(&cmd.reason),
            occurred_at: cmd.occurred_at,
        })];

        if self.exhausted_after(cmd.item_id, quantity) {
            if self.sales.is_empty() {
                events.push(ConsignmentEvent::ConsignmentReturned(ConsignmentReturned {
                    tenant_id: cmd.tenant_id,
                    consignment_id: cmd.consignment_id,
                    occurred_at: cmd.occurred_at,
                }));
            } else if self.status == ConsignmentStatus::Active {
                events.push(ConsignmentEvent::ConsignmentPartiallySettled(
                    ConsignmentPartiallySettled {
                        tenant_id: cmd.tenant_id,
                        consignment_id: cmd.consignment_id,
                        occurred_at: cmd.occurred_at,
                    },
                ));
            }
        }

        Ok(events)
    }

    fn handle_settle(
        &self,
        cmd: &SettleConsignment,
    ) -> Result<Vec<ConsignmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.consignment_id)?;

        match self.status {
            ConsignmentStatus::Settled => {
                return Err(DomainError::invariant("consignment is already settled"));
            }
            ConsignmentStatus::Cancelled => {
                return Err(DomainError::invariant(
                    "a cancelled consignment cannot be settled",
                ));
            }
            _ => {}
        }

        Ok(vec![ConsignmentEvent::ConsignmentSettled(ConsignmentSettled {
            tenant_id: cmd.tenant_id,
            consignment_id: cmd.consignment_id,
            notes: non_blank(&cmd.notes),
            total_sold: self.total_sold,
            store_amount: self.store_due,
            owner_amount: self.owner_due,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelConsignment,
    ) -> Result<Vec<ConsignmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.consignment_id)?;

        if self.status != ConsignmentStatus::Active {
            return Err(DomainError::invariant(format!(
                "only active consignments can be cancelled (status: {})",
                self.status
            )));
        }
        if !self.sales.is_empty() {
            return Err(DomainError::invariant(
                "a consignment with registered sales cannot be cancelled",
            ));
        }

        Ok(vec![ConsignmentEvent::ConsignmentCancelled(ConsignmentCancelled {
            tenant_id: cmd.tenant_id,
            consignment_id: cmd.consignment_id,
            reason: non_blank(&cmd.reason),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(
        &self,
        cmd: &ExpireConsignment,
    ) -> Result<Vec<ConsignmentEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.consignment_id)?;

        if !matches!(
            self.status,
            ConsignmentStatus::Active | ConsignmentStatus::PartiallySettled
        ) {
            return Err(DomainError::invariant(format!(
                "a {} consignment cannot expire",
                self.status
            )));
        }

        let expires_at = self
            .expires_at
            .ok_or_else(|| DomainError::invariant("consignment has no expiry date"))?;
        if cmd.occurred_at < expires_at {
            return Err(DomainError::invariant(format!(
                "consignment does not expire before {}",
                expires_at.to_rfc3339()
            )));
        }

        Ok(vec![ConsignmentEvent::ConsignmentExpired(ConsignmentExpired {
            tenant_id: cmd.tenant_id,
            consignment_id: cmd.consignment_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
