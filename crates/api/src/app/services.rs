use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use sqlx::PgPool;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use projectdesk_infra::{
    artifacts::ArtifactStore,
    config::PipelineConfig,
    jobs::{InMemoryJobStore, JobExecutor, JobKind, JobStore, PostgresJobStore},
    offers::{
        log_event, InMemoryOfferRepository, OfferEvent, OfferEventSink, OfferGenerationWorker,
        OfferOutcome, OfferRepository, OfferService, PostgresOfferRepository,
    },
    projects::{PostgresProjectDirectory, ProjectDirectory},
    render::PdfOfferRenderer,
};
use projectdesk_offers::ProjectId;

/// Capacity of the outcome broadcast; slow SSE clients skip what they miss.
const REALTIME_CAPACITY: usize = 256;

/// Event sink used by the API: logs every outcome and broadcasts it to SSE subscribers.
#[derive(Debug)]
pub struct ApiOfferEventSink {
    realtime_tx: broadcast::Sender<OfferEvent>,
}

impl ApiOfferEventSink {
    pub fn new(realtime_tx: broadcast::Sender<OfferEvent>) -> Self {
        Self { realtime_tx }
    }
}

impl OfferEventSink for ApiOfferEventSink {
    fn emit(&self, event: OfferEvent) {
        log_event(&event);
        // Lossy: no subscribers is fine.
        let _ = self.realtime_tx.send(event);
    }
}

/// Which family of stores backs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    InMemory,
    Postgres,
}

/// The four stores the pipeline runs on.
#[derive(Clone)]
pub struct Stores {
    pub backend: Backend,
    pub jobs: Arc<dyn JobStore>,
    pub offers: Arc<dyn OfferRepository>,
    pub projects: Arc<dyn ProjectDirectory>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

impl Stores {
    /// Jobs and offers in memory; projects and artifacts supplied by the caller.
    pub fn in_memory(projects: Arc<dyn ProjectDirectory>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            backend: Backend::InMemory,
            jobs: Arc::new(InMemoryJobStore::new()),
            offers: Arc::new(InMemoryOfferRepository::new()),
            projects,
            artifacts,
        }
    }

    /// Postgres-backed jobs, offers and projects.
    ///
    /// `runtime` must outlive every store; the stores block on it from worker threads.
    pub fn postgres(pool: PgPool, runtime: Handle, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            backend: Backend::Postgres,
            jobs: Arc::new(PostgresJobStore::new(pool.clone(), runtime.clone())),
            offers: Arc::new(PostgresOfferRepository::new(pool.clone(), runtime.clone())),
            projects: Arc::new(PostgresProjectDirectory::new(pool, runtime)),
            artifacts,
        }
    }
}

/// Executor type driven by `main`: one worker thread over the configured job store.
pub type OfferExecutor = JobExecutor<Arc<dyn JobStore>>;

/// Shared state handed to every route.
pub struct AppServices {
    offers: OfferService,
    backend: Backend,
    realtime_tx: broadcast::Sender<OfferEvent>,
}

impl AppServices {
    pub fn offers(&self) -> &OfferService {
        &self.offers
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<OfferEvent> {
        &self.realtime_tx
    }
}

/// Wire the offer service and its worker over `stores`.
///
/// The returned executor has the generation worker registered but is not running;
/// the caller decides whether to `spawn` it or drive it with `run_pending`.
pub fn build_services(stores: Stores, config: &PipelineConfig) -> (Arc<AppServices>, OfferExecutor) {
    let (realtime_tx, _) = broadcast::channel(REALTIME_CAPACITY);
    let sink = Arc::new(ApiOfferEventSink::new(realtime_tx.clone()));

    let worker = OfferGenerationWorker::new(
        stores.offers.clone(),
        stores.projects.clone(),
        stores.artifacts.clone(),
        Arc::new(PdfOfferRenderer::new(config.currency_symbol.clone())),
        sink,
    );
    let mut executor = JobExecutor::new(stores.jobs.clone()).with_config(config.executor_config());
    executor.register(JobKind::GENERATE_OFFER, worker);

    let offers = OfferService::new(
        stores.offers,
        stores.jobs,
        stores.artifacts,
        config.retry_policy(),
        config.offer,
    );

    let services = AppServices {
        offers,
        backend: stores.backend,
        realtime_tx,
    };
    (Arc::new(services), executor)
}

/// SSE stream of offer outcomes, optionally limited to one project.
pub fn offer_sse_stream(
    services: Arc<AppServices>,
    project_id: Option<ProjectId>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(event) if project_id.is_none_or(|p| p == event.project_id) => {
            let topic = match event.outcome {
                OfferOutcome::Completed { .. } => "offer.completed",
                OfferOutcome::Failed { .. } => "offer.failed",
            };
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
