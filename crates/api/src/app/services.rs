//! Infrastructure wiring: event store, bus, dispatcher, read models, worker.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use verdant_core::{Aggregate, AggregateId, DomainError, TenantId};
use verdant_events::{EventEnvelope, InMemoryEventBus};
use verdant_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    config::{AppConfig, StoreBackend},
    event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent},
    projections::{ProjectionError, ReadModels},
    workers::{WorkerHandle, spawn_read_model_worker},
};

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<SharedStore, SharedBus>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("event store: {0}")]
    Store(#[from] EventStoreError),

    #[error("read model rebuild failed: {0}")]
    Rebuild(#[from] ProjectionError),

    #[error("failed to start projection worker: {0}")]
    Worker(#[from] std::io::Error),

    #[error("persistent stores requested but the binary was built without the `postgres` feature")]
    PostgresDisabled,
}

/// Everything a request handler needs, shared behind an `Arc`.
pub struct AppServices {
    dispatcher: Dispatcher,
    read_models: Arc<ReadModels>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("read_models", &self.read_models)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    /// Wire the services around an existing store.
    ///
    /// Read models are rebuilt from the full store before the worker starts,
    /// so queries see everything persisted by earlier runs.
    pub fn with_store(store: SharedStore) -> Result<Self, ServiceError> {
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        let read_models = Arc::new(ReadModels::new());

        let history = store.load_all()?;
        let replayed = read_models.rebuild(&history)?;
        info!(events = replayed, "read models ready");

        let worker = spawn_read_model_worker(bus.clone(), read_models.clone())?;

        Ok(Self {
            dispatcher: CommandDispatcher::new(store, bus),
            read_models,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn read_models(&self) -> &ReadModels {
        &self.read_models
    }

    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &'static str,
        command: A::Command,
        make: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: verdant_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch(tenant_id, aggregate_id, aggregate_type, command, make)
    }

    /// Readiness: the event store answers.
    pub fn ready(&self) -> Result<(), EventStoreError> {
        self.dispatcher.store().ping()
    }

    /// Stop the projection worker. Later calls are no-ops.
    pub fn shutdown(&self) {
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => {
                warn!("worker handle lock poisoned");
                poisoned.into_inner().take()
            }
        };
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, ServiceError> {
    let store: SharedStore = match &config.store {
        StoreBackend::InMemory => {
            info!("using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
        StoreBackend::Postgres { database_url } => postgres_store(database_url).await?,
    };

    AppServices::with_store(store)
}

#[cfg(feature = "postgres")]
async fn postgres_store(database_url: &str) -> Result<SharedStore, ServiceError> {
    let store = verdant_infra::event_store::PostgresEventStore::connect(database_url).await?;
    info!("using postgres event store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_store(_database_url: &str) -> Result<SharedStore, ServiceError> {
    Err(ServiceError::PostgresDisabled)
}
