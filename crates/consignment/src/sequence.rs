//! Per-tenant, per-year consignment numbering.
//!
//! Each (tenant, year) pair owns one small stream whose id is derived from the
//! pair, so concurrent reservations race on the same stream version and the
//! loser retries. Numbers are never reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdant_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use verdant_events::Event;

/// `CONS-{year}-{seq:04}`; sequences past 9999 keep all their digits.
pub fn format_consignment_number(year: i32, seq: u32) -> String {
    format!("CONS-{year}-{seq:04}")
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsignmentSequenceId(pub AggregateId);

impl ConsignmentSequenceId {
    pub fn for_year(tenant_id: TenantId, year: i32) -> Self {
        Self(AggregateId::derived(
            tenant_id,
            &format!("consignment.sequence/{year}"),
        ))
    }
}

impl core::fmt::Display for ConsignmentSequenceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsignmentSequence {
    id: ConsignmentSequenceId,
    tenant_id: Option<TenantId>,
    year: Option<i32>,
    last: u32,
    version: u64,
}

impl ConsignmentSequence {
    pub fn empty(id: ConsignmentSequenceId) -> Self {
        Self {
            id,
            tenant_id: None,
            year: None,
            last: 0,
            version: 0,
        }
    }

    /// Last reserved sequence number (0 before the first reservation).
    pub fn last(&self) -> u32 {
        self.last
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }
}

impl AggregateRoot for ConsignmentSequence {
    type Id = ConsignmentSequenceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveNumber {
    pub tenant_id: TenantId,
    pub year: i32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceCommand {
    ReserveNumber(ReserveNumber),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberReserved {
    pub tenant_id: TenantId,
    pub year: i32,
    pub seq: u32,
    pub occurred_at: DateTime<Utc>,
}

impl NumberReserved {
    pub fn number(&self) -> String {
        format_consignment_number(self.year, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceEvent {
    NumberReserved(NumberReserved),
}

impl Event for SequenceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SequenceEvent::NumberReserved(_) => "consignment.sequence.number_reserved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SequenceEvent::NumberReserved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ConsignmentSequence {
    type Command = SequenceCommand;
    type Event = SequenceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SequenceEvent::NumberReserved(e) => {
                self.tenant_id = Some(e.tenant_id);
                self.year = Some(e.year);
                self.last = e.seq;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SequenceCommand::ReserveNumber(cmd) => self.handle_reserve(cmd),
        }
    }
}

impl ConsignmentSequence {
    fn handle_reserve(&self, cmd: &ReserveNumber) -> Result<Vec<SequenceEvent>, DomainError> {
        if let Some(tenant_id) = self.tenant_id {
            if tenant_id != cmd.tenant_id {
                return Err(DomainError::invariant("tenant mismatch"));
            }
        }
        if self.id != ConsignmentSequenceId::for_year(cmd.tenant_id, cmd.year) {
            return Err(DomainError::invariant("sequence id does not match tenant/year"));
        }

        let seq = self
            .last
            .checked_add(1)
            .ok_or_else(|| DomainError::invariant("consignment sequence exhausted"))?;

        Ok(vec![SequenceEvent::NumberReserved(NumberReserved {
            tenant_id: cmd.tenant_id,
            year: cmd.year,
            seq,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdant_events::execute;

    fn reserve(tenant_id: TenantId, year: i32) -> SequenceCommand {
        SequenceCommand::ReserveNumber(ReserveNumber {
            tenant_id,
            year,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn numbers_are_zero_padded() {
        assert_eq!(format_consignment_number(2026, 1), "CONS-2026-0001");
        assert_eq!(format_consignment_number(2026, 42), "CONS-2026-0042");
        assert_eq!(format_consignment_number(2026, 12345), "CONS-2026-12345");
    }

    #[test]
    fn reservations_increment_monotonically() {
        let tenant = TenantId::new();
        let mut seq = ConsignmentSequence::empty(ConsignmentSequenceId::for_year(tenant, 2026));

        let mut numbers = Vec::new();
        for _ in 0..3 {
            let events = execute(&mut seq, &reserve(tenant, 2026)).unwrap();
            let SequenceEvent::NumberReserved(e) = &events[0];
            numbers.push(e.number());
        }

        assert_eq!(
            numbers,
            vec!["CONS-2026-0001", "CONS-2026-0002", "CONS-2026-0003"]
        );
        assert_eq!(seq.last(), 3);
        assert_eq!(seq.version(), 3);
    }

    #[test]
    fn each_year_and_tenant_has_its_own_stream() {
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        assert_ne!(
            ConsignmentSequenceId::for_year(t1, 2025),
            ConsignmentSequenceId::for_year(t1, 2026)
        );
        assert_ne!(
            ConsignmentSequenceId::for_year(t1, 2026),
            ConsignmentSequenceId::for_year(t2, 2026)
        );

        let seq = ConsignmentSequence::empty(ConsignmentSequenceId::for_year(t1, 2026));
        assert!(seq.handle(&reserve(t1, 2025)).is_err());
        assert!(seq.handle(&reserve(t2, 2026)).is_err());
    }
}
