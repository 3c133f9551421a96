//! Offer generation pipeline: record storage, the queue worker, the
//! submission/status service and operational events.

mod events;
mod postgres;
mod service;
mod worker;

pub use events::{log_event, InMemoryOfferEventSink, OfferEvent, OfferEventSink, OfferOutcome};
pub use postgres::PostgresOfferRepository;
pub use service::{FetchError, OfferArtifact, OfferService, SubmitError};
pub use worker::{OfferGenerationWorker, OfferJobPayload};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use projectdesk_offers::{OfferId, OfferRecord, ProjectId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum OfferStoreError {
    #[error("offer not found: {0}")]
    NotFound(OfferId),
    #[error("offer already exists: {0}")]
    AlreadyExists(OfferId),
    #[error("offer storage error: {0}")]
    Storage(String),
}

impl<T> From<PoisonError<T>> for OfferStoreError {
    fn from(_: PoisonError<T>) -> Self {
        OfferStoreError::Storage("offer repository lock poisoned".to_string())
    }
}

/// Persistence for offer records.
///
/// Records are never deleted. Once a record has an artifact path it is frozen:
/// [`OfferRepository::update_if_incomplete`] is a compare-and-set on the
/// stored `artifact_path` being empty, so duplicate job deliveries cannot
/// overwrite the first success.
pub trait OfferRepository: Send + Sync {
    fn insert(&self, offer: &OfferRecord) -> Result<(), OfferStoreError>;

    fn get(&self, id: OfferId) -> Result<Option<OfferRecord>, OfferStoreError>;

    /// All offers of a project, newest first.
    fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<OfferRecord>, OfferStoreError>;

    /// Store `offer` only if the stored record has no artifact yet.
    /// Returns `false` when another attempt already completed it.
    fn update_if_incomplete(&self, offer: &OfferRecord) -> Result<bool, OfferStoreError>;
}

impl<R: OfferRepository + ?Sized> OfferRepository for Arc<R> {
    fn insert(&self, offer: &OfferRecord) -> Result<(), OfferStoreError> {
        (**self).insert(offer)
    }

    fn get(&self, id: OfferId) -> Result<Option<OfferRecord>, OfferStoreError> {
        (**self).get(id)
    }

    fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<OfferRecord>, OfferStoreError> {
        (**self).list_for_project(project_id)
    }

    fn update_if_incomplete(&self, offer: &OfferRecord) -> Result<bool, OfferStoreError> {
        (**self).update_if_incomplete(offer)
    }
}

/// In-memory offer repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOfferRepository {
    offers: RwLock<HashMap<OfferId, OfferRecord>>,
}

impl InMemoryOfferRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OfferRepository for InMemoryOfferRepository {
    fn insert(&self, offer: &OfferRecord) -> Result<(), OfferStoreError> {
        let mut offers = self.offers.write()?;
        let id = offer.id_typed();
        if offers.contains_key(&id) {
            return Err(OfferStoreError::AlreadyExists(id));
        }
        offers.insert(id, offer.clone());
        Ok(())
    }

    fn get(&self, id: OfferId) -> Result<Option<OfferRecord>, OfferStoreError> {
        Ok(self.offers.read()?.get(&id).cloned())
    }

    fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<OfferRecord>, OfferStoreError> {
        let offers = self.offers.read()?;
        let mut result: Vec<_> = offers
            .values()
            .filter(|o| o.project_id() == project_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id_typed().cmp(&a.id_typed()))
        });
        Ok(result)
    }

    fn update_if_incomplete(&self, offer: &OfferRecord) -> Result<bool, OfferStoreError> {
        let mut offers = self.offers.write()?;
        let id = offer.id_typed();
        let stored = offers.get_mut(&id).ok_or(OfferStoreError::NotFound(id))?;
        if stored.is_ready() {
            return Ok(false);
        }
        *stored = offer.clone();
        Ok(true)
    }
}
