//! Background workers that keep read models fed from the bus.

pub mod projection_worker;

use std::io;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use verdant_events::{EventBus, EventEnvelope};

use crate::projections::ReadModels;

pub use projection_worker::{ProjectionWorker, WorkerHandle};

/// Feed every read model from `bus`, for all tenants.
pub fn spawn_read_model_worker<B>(bus: B, read_models: Arc<ReadModels>) -> io::Result<WorkerHandle>
where
    B: EventBus<EventEnvelope<JsonValue>> + Send + Sync + 'static,
{
    ProjectionWorker::spawn("read-models", bus, None, move |envelope: EventEnvelope<JsonValue>| {
        read_models.apply(&envelope)
    })
}
