//! Consignment ledger domain module (event-sourced).
//!
//! Goods a supplier places at a client business's shop stay the supplier's
//! (the owner's) until sold; every sale splits its revenue between the store
//! and the owner. This crate holds the consignment aggregate and the per-year
//! number sequence. Pure domain logic: no IO, no HTTP, no storage.

pub mod consignment;
pub mod sequence;

pub use consignment::{
    CancelConsignment, Consignment, ConsignmentCancelled, ConsignmentCommand, ConsignmentCreated,
    ConsignmentEvent, ConsignmentExpired, ConsignmentId, ConsignmentItem, ConsignmentItemId,
    ConsignmentPartiallySettled, ConsignmentReturned, ConsignmentSale, ConsignmentSettled,
    ConsignmentStatus, CreateConsignment, ExpireConsignment, ItemsReturned, NewConsignmentItem,
    RegisterSale, ReturnItems, SaleId, SaleRegistered, SettleConsignment,
};
pub use sequence::{
    ConsignmentSequence, ConsignmentSequenceId, NumberReserved, ReserveNumber, SequenceCommand,
    SequenceEvent, format_consignment_number,
};
