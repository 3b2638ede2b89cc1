use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use verdant_events::Event;

/// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product status lifecycle. Archiving is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Archived,
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    category: Option<String>,
    status: ProductStatus,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            category: None,
            status: ProductStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Only created, active products may be placed on consignment.
    pub fn can_be_consigned(&self) -> bool {
        self.created && self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RenameProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    RenameProduct(RenameProduct),
    ArchiveProduct(ArchiveProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductRenamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRenamed {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductRenamed(ProductRenamed),
    ProductArchived(ProductArchived),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::ProductRenamed(_) => "products.product.renamed",
            ProductEvent::ProductArchived(_) => "products.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductRenamed(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.category = e.category.clone();
                self.status = ProductStatus::Active;
                self.created = true;
            }
            ProductEvent::ProductRenamed(e) => {
                self.name = e.name.clone();
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::RenameProduct(cmd) => self.handle_rename(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Product {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }

        let sku = cmd.sku.trim();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let category = cmd
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: sku.to_string(),
            name: name.to_string(),
            category,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_rename(&self, cmd: &RenameProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("product"));
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be renamed"));
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if name == self.name {
            return Ok(vec![]);
        }

        Ok(vec![ProductEvent::ProductRenamed(ProductRenamed {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            name: name.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found("product"));
        }
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_product_id(cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn create_cmd(tenant_id: TenantId, product_id: ProductId) -> CreateProduct {
        CreateProduct {
            tenant_id,
            product_id,
            sku: "OAT-1L".to_string(),
            name: "Oat Milk 1L".to_string(),
            category: Some("Dairy alternatives".to_string()),
            occurred_at: Utc::now(),
        }
    }

    fn created_product() -> (Product, TenantId, ProductId) {
        let tenant_id = test_tenant_id();
        let product_id = test_product_id();
        let mut product = Product::empty(product_id);
        let events = product
            .handle(&ProductCommand::CreateProduct(create_cmd(tenant_id, product_id)))
            .unwrap();
        product.apply(&events[0]);
        (product, tenant_id, product_id)
    }

    #[test]
    fn create_product_emits_product_created_event() {
        let (product, tenant_id, product_id) = created_product();
        assert_eq!(product.tenant_id(), Some(tenant_id));
        assert_eq!(product.id_typed(), product_id);
        assert_eq!(product.sku(), "OAT-1L");
        assert_eq!(product.category(), Some("Dairy alternatives"));
        assert_eq!(product.status(), ProductStatus::Active);
        assert!(product.can_be_consigned());
        assert_eq!(product.version(), 1);
    }

    #[test]
    fn create_product_rejects_blank_sku_or_name() {
        let product = Product::empty(test_product_id());

        let mut cmd = create_cmd(test_tenant_id(), test_product_id());
        cmd.sku = "   ".to_string();
        assert!(matches!(
            product.handle(&ProductCommand::CreateProduct(cmd)),
            Err(DomainError::Validation(_))
        ));

        let mut cmd = create_cmd(test_tenant_id(), test_product_id());
        cmd.name = String::new();
        assert!(matches!(
            product.handle(&ProductCommand::CreateProduct(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn create_product_rejects_duplicate_creation() {
        let (product, tenant_id, product_id) = created_product();
        let err = product
            .handle(&ProductCommand::CreateProduct(create_cmd(tenant_id, product_id)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn rename_is_noop_for_same_name() {
        let (mut product, tenant_id, product_id) = created_product();
        let rename = |name: &str| {
            ProductCommand::RenameProduct(RenameProduct {
                tenant_id,
                product_id,
                name: name.to_string(),
                occurred_at: Utc::now(),
            })
        };

        assert!(product.handle(&rename("Oat Milk 1L")).unwrap().is_empty());

        let events = product.handle(&rename(" Barista Oat 1L ")).unwrap();
        product.apply(&events[0]);
        assert_eq!(product.name(), "Barista Oat 1L");
    }

    #[test]
    fn archived_product_cannot_be_consigned_or_renamed() {
        let (mut product, tenant_id, product_id) = created_product();
        let archive = ProductCommand::ArchiveProduct(ArchiveProduct {
            tenant_id,
            product_id,
            occurred_at: Utc::now(),
        });
        let events = product.handle(&archive).unwrap();
        product.apply(&events[0]);

        assert_eq!(product.status(), ProductStatus::Archived);
        assert!(!product.can_be_consigned());
        assert!(matches!(
            product.handle(&archive),
            Err(DomainError::Conflict(_))
        ));

        let err = product
            .handle(&ProductCommand::RenameProduct(RenameProduct {
                tenant_id,
                product_id,
                name: "Other".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn commands_on_missing_product_are_not_found() {
        let product = Product::empty(test_product_id());
        let err = product
            .handle(&ProductCommand::ArchiveProduct(ArchiveProduct {
                tenant_id: test_tenant_id(),
                product_id: *product.id(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound("product".to_string()));
    }

    #[test]
    fn other_tenant_cannot_archive() {
        let (product, _tenant_id, product_id) = created_product();
        let err = product
            .handle(&ProductCommand::ArchiveProduct(ArchiveProduct {
                tenant_id: test_tenant_id(),
                product_id,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(msg) if msg == "tenant mismatch"));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

            #[test]
            fn handle_is_pure_and_trims_input(
                sku in "[A-Z0-9-]{1,20}",
                name in "[A-Za-z][A-Za-z0-9 ]{0,60}",
            ) {
                let product = Product::empty(test_product_id());
                let before = product.clone();
                let cmd = CreateProduct {
                    tenant_id: test_tenant_id(),
                    product_id: *product.id(),
                    sku: format!("  {sku} "),
                    name: name.clone(),
                    category: None,
                    occurred_at: Utc::now(),
                };
                let events = product.handle(&ProductCommand::CreateProduct(cmd)).unwrap();
                prop_assert_eq!(&product, &before);
                match &events[0] {
                    ProductEvent::ProductCreated(e) => {
                        prop_assert_eq!(&e.sku, &sku);
                        prop_assert_eq!(e.name.as_str(), name.trim());
                    }
                    other => prop_assert!(false, "unexpected event {:?}", other),
                }
            }
        }
    }
}
