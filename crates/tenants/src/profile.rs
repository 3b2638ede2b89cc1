use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use verdant_events::Event;

const PROFILE_STREAM: &str = "tenant.profile";

/// Identifier of a tenant's profile stream (one per tenant).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantProfileId(pub AggregateId);

impl TenantProfileId {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self(AggregateId::derived(tenant_id, PROFILE_STREAM))
    }
}

impl core::fmt::Display for TenantProfileId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
}

/// Aggregate root: TenantProfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantProfile {
    id: TenantProfileId,
    tenant_id: Option<TenantId>,
    name: String,
    contact_email: Option<String>,
    status: TenantStatus,
    version: u64,
    created: bool,
}

impl TenantProfile {
    /// Create an empty, not-yet-registered instance for rehydration.
    pub fn empty(id: TenantProfileId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            contact_email: None,
            status: TenantStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TenantProfileId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact_email(&self) -> Option<&str> {
        self.contact_email.as_deref()
    }

    pub fn status(&self) -> TenantStatus {
        self.status
    }

    /// Registered and not suspended: allowed to open consignments.
    pub fn is_active(&self) -> bool {
        self.created && self.status == TenantStatus::Active
    }
}

impl AggregateRoot for TenantProfile {
    type Id = TenantProfileId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterTenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTenant {
    pub tenant_id: TenantId,
    pub name: String,
    pub contact_email: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SuspendTenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendTenant {
    pub tenant_id: TenantId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReactivateTenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivateTenant {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantCommand {
    RegisterTenant(RegisterTenant),
    SuspendTenant(SuspendTenant),
    ReactivateTenant(ReactivateTenant),
}

/// Event: TenantRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRegistered {
    pub tenant_id: TenantId,
    pub name: String,
    pub contact_email: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TenantSuspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSuspended {
    pub tenant_id: TenantId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TenantReactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantReactivated {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantEvent {
    TenantRegistered(TenantRegistered),
    TenantSuspended(TenantSuspended),
    TenantReactivated(TenantReactivated),
}

impl Event for TenantEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TenantEvent::TenantRegistered(_) => "tenants.tenant.registered",
            TenantEvent::TenantSuspended(_) => "tenants.tenant.suspended",
            TenantEvent::TenantReactivated(_) => "tenants.tenant.reactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TenantEvent::TenantRegistered(e) => e.occurred_at,
            TenantEvent::TenantSuspended(e) => e.occurred_at,
            TenantEvent::TenantReactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TenantProfile {
    type Command = TenantCommand;
    type Event = TenantEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TenantEvent::TenantRegistered(e) => {
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.contact_email = e.contact_email.clone();
                self.status = TenantStatus::Active;
                self.created = true;
            }
            TenantEvent::TenantSuspended(_) => {
                self.status = TenantStatus::Suspended;
            }
            TenantEvent::TenantReactivated(_) => {
                self.status = TenantStatus::Active;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TenantCommand::RegisterTenant(cmd) => self.handle_register(cmd),
            TenantCommand::SuspendTenant(cmd) => self.handle_suspend(cmd),
            TenantCommand::ReactivateTenant(cmd) => self.handle_reactivate(cmd),
        }
    }
}

impl TenantProfile {
    fn ensure_registered(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found("tenant"));
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterTenant) -> Result<Vec<TenantEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("tenant is already registered"));
        }
        if self.id != TenantProfileId::for_tenant(cmd.tenant_id) {
            return Err(DomainError::invariant("tenant profile id mismatch"));
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("tenant name cannot be empty"));
        }

        let contact_email = match cmd.contact_email.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(email) => {
                let (local, domain) = email.split_once('@').unwrap_or(("", ""));
                if local.is_empty() || !domain.contains('.') {
                    return Err(DomainError::validation(format!(
                        "invalid contact email '{email}'"
                    )));
                }
                Some(email.to_string())
            }
        };

        Ok(vec![TenantEvent::TenantRegistered(TenantRegistered {
            tenant_id: cmd.tenant_id,
            name: name.to_string(),
            contact_email,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_suspend(&self, cmd: &SuspendTenant) -> Result<Vec<TenantEvent>, DomainError> {
        self.ensure_registered(cmd.tenant_id)?;
        if self.status == TenantStatus::Suspended {
            return Err(DomainError::conflict("tenant is already suspended"));
        }

        Ok(vec![TenantEvent::TenantSuspended(TenantSuspended {
            tenant_id: cmd.tenant_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reactivate(&self, cmd: &ReactivateTenant) -> Result<Vec<TenantEvent>, DomainError> {
        self.ensure_registered(cmd.tenant_id)?;
        if self.status == TenantStatus::Active {
            return Err(DomainError::conflict("tenant is already active"));
        }

        Ok(vec![TenantEvent::TenantReactivated(TenantReactivated {
            tenant_id: cmd.tenant_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
