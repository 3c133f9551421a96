//! Queue handler that turns an offer job into an artifact plus a completed record.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use projectdesk_offers::{OfferDocument, OfferId, OfferRecord, ProjectId};

use super::events::{OfferEvent, OfferEventSink, OfferOutcome};
use super::{OfferRepository, OfferStoreError};
use crate::artifacts::{ArtifactPath, ArtifactStore};
use crate::jobs::{Job, JobError, JobHandler, JobKind, JobResult};
use crate::projects::{ProjectDirectory, ProjectLookupError};
use crate::render::OfferRenderer;

/// Job payload: which offer to generate, for which project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferJobPayload {
    pub offer_id: OfferId,
    pub project_id: ProjectId,
}

impl OfferJobPayload {
    pub fn new(offer_id: OfferId, project_id: ProjectId) -> Self {
        Self {
            offer_id,
            project_id,
        }
    }

    pub fn into_job(self) -> Job {
        Job::new(
            JobKind::GenerateOffer,
            serde_json::json!({
                "offer_id": self.offer_id,
                "project_id": self.project_id,
            }),
        )
    }

    pub fn from_job(job: &Job) -> Result<Self, JobError> {
        serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::terminal(format!("malformed offer job payload: {e}")))
    }
}

/// Handler for [`JobKind::GenerateOffer`].
///
/// Each attempt writes its artifact to a fresh path before touching the
/// record, and the record update is a compare-and-set, so duplicate
/// deliveries leave exactly one consistent result behind.
#[derive(Clone)]
pub struct OfferGenerationWorker {
    offers: Arc<dyn OfferRepository>,
    projects: Arc<dyn ProjectDirectory>,
    artifacts: Arc<dyn ArtifactStore>,
    renderer: Arc<dyn OfferRenderer>,
    events: Arc<dyn OfferEventSink>,
}

impl OfferGenerationWorker {
    pub fn new(
        offers: Arc<dyn OfferRepository>,
        projects: Arc<dyn ProjectDirectory>,
        artifacts: Arc<dyn ArtifactStore>,
        renderer: Arc<dyn OfferRenderer>,
        events: Arc<dyn OfferEventSink>,
    ) -> Self {
        Self {
            offers,
            projects,
            artifacts,
            renderer,
            events,
        }
    }

    fn generate(&self, job: &Job) -> Result<(), JobError> {
        let payload = OfferJobPayload::from_job(job)?;

        let mut offer = self
            .offers
            .get(payload.offer_id)
            .map_err(store_error)?
            .ok_or_else(|| JobError::terminal(format!("offer not found: {}", payload.offer_id)))?;

        if offer.project_id() != payload.project_id {
            return Err(JobError::terminal(format!(
                "offer {} belongs to project {}, not {}",
                payload.offer_id,
                offer.project_id(),
                payload.project_id
            )));
        }

        if offer.is_ready() {
            debug!(offer_id = %payload.offer_id, "offer already completed, skipping duplicate delivery");
            return Ok(());
        }

        offer
            .mark_processing(Utc::now())
            .map_err(|e| JobError::terminal(e.to_string()))?;
        if !self.offers.update_if_incomplete(&offer).map_err(store_error)? {
            debug!(offer_id = %payload.offer_id, "offer completed concurrently");
            return Ok(());
        }

        let snapshot = self
            .projects
            .snapshot(payload.project_id)
            .map_err(lookup_error)?;

        let document = OfferDocument::prepare(&offer, &snapshot, Utc::now())
            .map_err(|e| JobError::terminal(format!("cannot compute offer total: {e}")))?;

        let bytes = self
            .renderer
            .render(&document)
            .map_err(|e| JobError::retryable(format!("render failed: {e}")))?;

        let path = ArtifactPath::for_offer(payload.project_id, payload.offer_id, Utc::now());
        self.artifacts
            .put(&path, &bytes)
            .map_err(|e| JobError::retryable(format!("artifact write failed: {e}")))?;

        // The artifact exists from here on; only now may the record point at it.
        if let Err(e) = offer.complete(path.as_str(), document.total, Utc::now()) {
            self.discard(&path);
            return Err(JobError::terminal(e.to_string()));
        }

        match self.offers.update_if_incomplete(&offer) {
            Ok(true) => {
                self.events.emit(OfferEvent {
                    offer_id: payload.offer_id,
                    project_id: payload.project_id,
                    outcome: OfferOutcome::Completed {
                        artifact_path: path.to_string(),
                        amount: document.total,
                    },
                    at: Utc::now(),
                });
                Ok(())
            }
            Ok(false) => {
                info!(
                    offer_id = %payload.offer_id,
                    artifact_path = %path,
                    "another attempt completed the offer first, discarding artifact"
                );
                self.discard(&path);
                Ok(())
            }
            // Keep the file: the update may have landed even though we saw an error.
            Err(e) => Err(store_error(e)),
        }
    }

    fn discard(&self, path: &ArtifactPath) {
        if let Err(e) = self.artifacts.discard(path) {
            warn!(artifact_path = %path, error = %e, "failed to discard unreferenced artifact");
        }
    }

    fn mark_failed(&self, offer: &mut OfferRecord, reason: &str) -> Result<bool, OfferStoreError> {
        if offer.fail(reason, Utc::now()).is_err() {
            return Ok(false);
        }
        self.offers.update_if_incomplete(offer)
    }
}

fn store_error(e: OfferStoreError) -> JobError {
    match e {
        OfferStoreError::NotFound(id) => JobError::terminal(format!("offer not found: {id}")),
        other => JobError::retryable(other.to_string()),
    }
}

fn lookup_error(e: ProjectLookupError) -> JobError {
    if e.is_transient() {
        JobError::retryable(e.to_string())
    } else {
        JobError::terminal(e.to_string())
    }
}

impl JobHandler for OfferGenerationWorker {
    fn handle(&self, job: &Job) -> JobResult {
        let span = tracing::info_span!("offer_job", job_id = %job.id, attempt = job.attempt);
        let _guard = span.enter();

        let result = self.generate(job);
        if let Err(e) = &result {
            warn!(error = %e, retryable = e.is_retryable(), "offer generation attempt failed");
        }
        result.into()
    }

    fn on_abandoned(&self, job: &Job, reason: &str) {
        let Ok(payload) = OfferJobPayload::from_job(job) else {
            error!(job_id = %job.id, reason, "abandoned offer job has an unreadable payload");
            return;
        };

        match self.offers.get(payload.offer_id) {
            Ok(Some(mut offer)) => match self.mark_failed(&mut offer, reason) {
                Ok(true) => {}
                Ok(false) => {
                    // A duplicate attempt completed it; nothing was lost.
                    debug!(offer_id = %payload.offer_id, "abandoned job's offer is already complete");
                    return;
                }
                Err(e) => {
                    error!(offer_id = %payload.offer_id, error = %e, "failed to record offer failure");
                }
            },
            Ok(None) => {}
            Err(e) => {
                error!(offer_id = %payload.offer_id, error = %e, "failed to load abandoned offer");
            }
        }

        self.events.emit(OfferEvent {
            offer_id: payload.offer_id,
            project_id: payload.project_id,
            outcome: OfferOutcome::Failed {
                reason: reason.to_string(),
                attempts: job.attempt,
            },
            at: Utc::now(),
        });
    }
}
