use chrono::{DateTime, Utc};

/// A domain event: an immutable, versioned fact.
///
/// Payloads are persisted as JSON, so the type name and schema version are
/// stored next to them to keep old streams readable.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "consignment.sale.registered").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// Business time of the fact.
    fn occurred_at(&self) -> DateTime<Utc>;
}
