use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use projectdesk_core::Money;
use projectdesk_offers::{OfferId, ProjectId};

/// Final outcome of an offer's generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OfferOutcome {
    Completed { artifact_path: String, amount: Money },
    Failed { reason: String, attempts: u32 },
}

/// Operator-visible signal emitted once per job outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferEvent {
    pub offer_id: OfferId,
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub outcome: OfferOutcome,
    pub at: DateTime<Utc>,
}

/// Sink for offer outcome events.
pub trait OfferEventSink: Send + Sync + 'static {
    fn emit(&self, event: OfferEvent);
}

/// Write one structured log line for an offer outcome.
pub fn log_event(event: &OfferEvent) {
    match &event.outcome {
        OfferOutcome::Completed {
            artifact_path,
            amount,
        } => info!(
            offer_id = %event.offer_id,
            project_id = %event.project_id,
            artifact_path = %artifact_path,
            amount = %amount,
            "offer generation completed"
        ),
        OfferOutcome::Failed { reason, attempts } => error!(
            offer_id = %event.offer_id,
            project_id = %event.project_id,
            attempts = attempts,
            reason = %reason,
            "offer generation failed"
        ),
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOfferEventSink {
    inner: Mutex<Vec<OfferEvent>>,
}

impl InMemoryOfferEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<OfferEvent> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OfferEventSink for InMemoryOfferEventSink {
    fn emit(&self, event: OfferEvent) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl<S: OfferEventSink> OfferEventSink for std::sync::Arc<S> {
    fn emit(&self, event: OfferEvent) {
        (**self).emit(event)
    }
}
