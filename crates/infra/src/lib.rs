//! Infrastructure layer: event store, dispatcher, read models, config.

pub mod command_dispatcher;
pub mod config;
pub mod consignments;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod workers;

#[cfg(test)]
mod integration_tests;
