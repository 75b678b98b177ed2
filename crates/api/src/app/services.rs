use std::io;
use std::sync::Arc;

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value as JsonValue;
use tracing::{error, info};

use ecf_events::{EventEnvelope, InMemoryEventBus};
use ecf_infra::{
    allocator::SequenceAllocator,
    command_dispatcher::{CommandDispatcher, Dispatcher},
    config::Settings,
    event_store::{EventStore, InMemoryEventStore, PostgresEventStore},
    external::{HttpSigningService, SigningService},
    jobs::{self, JobHandle},
    ledger::CreditLedger,
    locks::RecordLocks,
    read_model::AuditTrail,
    workers::{WorkerHandle, spawn_audit_worker},
    workflow::DocumentWorkflow,
};

use crate::app::errors::json_error;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppServices {
    pub dispatcher: Arc<Dispatcher>,
    pub allocator: Arc<SequenceAllocator>,
    pub ledger: Arc<CreditLedger>,
    pub workflow: Arc<DocumentWorkflow>,
    pub audit: Arc<AuditTrail>,
}

impl AppServices {
    /// Wire the services over `store` and rebuild the read models from it.
    ///
    /// Blocks on the store; call from a blocking context.
    pub fn assemble(
        store: Arc<dyn EventStore>,
        signer: Arc<dyn SigningService>,
    ) -> anyhow::Result<Self> {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> =
            Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
        let locks = Arc::new(RecordLocks::new());

        let allocator = Arc::new(SequenceAllocator::new(dispatcher.clone(), locks.clone()));
        let ledger = Arc::new(CreditLedger::new(dispatcher.clone(), locks.clone()));
        let workflow = Arc::new(DocumentWorkflow::new(
            dispatcher.clone(),
            locks,
            allocator.clone(),
            ledger.clone(),
            signer,
        ));

        let ranges = allocator.rebuild().context("rebuilding range registry")?;
        let credits = ledger.rebuild().context("rebuilding credit index")?;
        let documents = workflow.rebuild().context("rebuilding document index")?;
        info!(ranges, credits, documents, "read models restored");

        Ok(Self {
            dispatcher,
            allocator,
            ledger,
            workflow,
            audit: Arc::new(AuditTrail::new()),
        })
    }

    /// In-memory store with the given signing service (tests and local runs).
    pub fn in_memory(signer: Arc<dyn SigningService>) -> anyhow::Result<Self> {
        Self::assemble(Arc::new(InMemoryEventStore::new()), signer)
    }
}

/// Build the services described by `settings`.
pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let store: Arc<dyn EventStore> = match &settings.database_url {
        Some(url) => {
            let store = PostgresEventStore::connect(url)
                .await
                .context("connecting to the Postgres event store")?;
            info!("using Postgres event store");
            Arc::new(store)
        }
        None => {
            info!("ECF_DATABASE_URL not set; using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };

    let microservice = settings.microservice.clone();
    tokio::task::spawn_blocking(move || {
        let signer = HttpSigningService::new(microservice)
            .context("building signing service client")?;
        AppServices::assemble(store, Arc::new(signer))
    })
    .await
    .context("service assembly task panicked")?
}

/// Background threads started next to the HTTP server.
#[derive(Debug)]
pub struct Background {
    jobs: Vec<JobHandle>,
    workers: Vec<WorkerHandle>,
}

impl Background {
    pub fn start(services: &AppServices, settings: &Settings) -> io::Result<Self> {
        let workers = vec![spawn_audit_worker(
            services.dispatcher.bus().clone(),
            services.audit.clone(),
        )?];
        let jobs = vec![
            jobs::spawn_expiry_sweep(services.allocator.clone(), settings.expiry_sweep_interval)?,
            jobs::spawn_status_poll(
                services.workflow.clone(),
                settings.status_poll_interval,
                settings.status_poll_batch,
            )?,
        ];
        Ok(Self { jobs, workers })
    }

    /// Stop every job and worker, waiting for in-flight runs.
    pub fn shutdown(self) {
        for job in self.jobs {
            job.shutdown();
        }
        for worker in self.workers {
            worker.shutdown();
        }
    }
}

/// Run service code on the blocking pool.
///
/// The services take record locks and may block on the event store, so
/// handlers never call mutating operations on an async worker thread.
pub async fn blocking<T, F>(services: &Arc<AppServices>, f: F) -> Result<T, Response>
where
    F: FnOnce(&AppServices) -> Result<T, Response> + Send + 'static,
    T: Send + 'static,
{
    let services = services.clone();
    match tokio::task::spawn_blocking(move || f(&services)).await {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "blocking task failed");
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "request task failed",
            ))
        }
    }
}
