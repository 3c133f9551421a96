//! Submission, status and download operations over the pipeline.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use projectdesk_core::DomainError;
use projectdesk_offers::{OfferId, OfferRecord, ProjectId};

use super::worker::OfferJobPayload;
use super::{OfferRepository, OfferStoreError};
use crate::artifacts::{ArtifactError, ArtifactPath, ArtifactStore};
use crate::jobs::{EnqueueOptions, JobStats, JobStore, JobStoreError, RetryPolicy};
use crate::render::PDF_CONTENT_TYPE;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] OfferStoreError),
    #[error("failed to enqueue offer job: {0}")]
    Queue(#[from] JobStoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("offer not found: {0}")]
    OfferNotFound(OfferId),
    /// No artifact path yet, or the file behind it is gone.
    #[error("File not found or not generated yet")]
    NotGenerated(OfferId),
    #[error(transparent)]
    Store(#[from] OfferStoreError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// A completed offer's document.
#[derive(Debug, Clone)]
pub struct OfferArtifact {
    pub offer: OfferRecord,
    /// Download name, `offer-{project}-{offer}.pdf`
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Entry point for requesting offers and reading their results.
#[derive(Clone)]
pub struct OfferService {
    offers: Arc<dyn OfferRepository>,
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    retry_policy: RetryPolicy,
    options: EnqueueOptions,
}

impl OfferService {
    pub fn new(
        offers: Arc<dyn OfferRepository>,
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        retry_policy: RetryPolicy,
        options: EnqueueOptions,
    ) -> Self {
        Self {
            offers,
            jobs,
            artifacts,
            retry_policy,
            options,
        }
    }

    /// Create a pending offer and enqueue its generation job.
    ///
    /// The record exists before the job does, so it can be polled right away.
    /// If the enqueue fails the record is marked failed and the error returned.
    pub fn submit(&self, project_id: ProjectId, name: Option<&str>) -> Result<OfferRecord, SubmitError> {
        let mut offer = OfferRecord::request(OfferId::generate(), project_id, name, Utc::now())?;
        let job = OfferJobPayload::new(offer.id_typed(), project_id)
            .into_job()
            .with_retry_policy(self.retry_policy.clone())
            .with_options(self.options);
        let job_id = job.id;

        self.offers.insert(&offer)?;

        if let Err(e) = self.jobs.enqueue(job) {
            error!(offer_id = %offer.id_typed(), error = %e, "failed to enqueue offer job");
            if offer.fail(format!("enqueue failed: {e}"), Utc::now()).is_ok() {
                if let Err(store_err) = self.offers.update_if_incomplete(&offer) {
                    error!(offer_id = %offer.id_typed(), error = %store_err, "failed to mark offer failed");
                }
            }
            return Err(e.into());
        }

        info!(
            offer_id = %offer.id_typed(),
            project_id = %project_id,
            job_id = %job_id,
            "offer generation requested"
        );
        Ok(offer)
    }

    pub fn get(&self, offer_id: OfferId) -> Result<Option<OfferRecord>, OfferStoreError> {
        self.offers.get(offer_id)
    }

    /// Like [`OfferService::get`], but only if the offer belongs to `project_id`.
    pub fn get_for_project(
        &self,
        project_id: ProjectId,
        offer_id: OfferId,
    ) -> Result<Option<OfferRecord>, OfferStoreError> {
        Ok(self
            .offers
            .get(offer_id)?
            .filter(|o| o.project_id() == project_id))
    }

    /// Whether the offer has an artifact yet. Unknown offers are an error.
    pub fn is_ready(&self, offer_id: OfferId) -> Result<bool, FetchError> {
        self.offers
            .get(offer_id)?
            .map(|o| o.is_ready())
            .ok_or(FetchError::OfferNotFound(offer_id))
    }

    /// All offers of a project, newest first.
    pub fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<OfferRecord>, OfferStoreError> {
        self.offers.list_for_project(project_id)
    }

    pub fn fetch_artifact(
        &self,
        project_id: ProjectId,
        offer_id: OfferId,
    ) -> Result<OfferArtifact, FetchError> {
        let offer = self
            .get_for_project(project_id, offer_id)?
            .ok_or(FetchError::OfferNotFound(offer_id))?;
        if !offer.is_ready() {
            return Err(FetchError::NotGenerated(offer_id));
        }

        let path = ArtifactPath::parse(offer.artifact_path())?;
        let bytes = match self.artifacts.get(&path) {
            Ok(bytes) => bytes,
            Err(ArtifactError::NotFound(_)) => return Err(FetchError::NotGenerated(offer_id)),
            Err(e) => return Err(e.into()),
        };

        Ok(OfferArtifact {
            file_name: format!("offer-{project_id}-{offer_id}.pdf"),
            content_type: PDF_CONTENT_TYPE,
            bytes,
            offer,
        })
    }

    pub fn job_stats(&self) -> Result<JobStats, JobStoreError> {
        self.jobs.stats()
    }
}
