use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use projectdesk_core::{AggregateId, DomainError, DomainResult, Money};

use crate::project::ProjectId;

/// Name used when a generation request does not provide one.
pub const DEFAULT_OFFER_NAME: &str = "Project Offer";

/// Offer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(pub AggregateId);

impl OfferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for OfferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for OfferId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Generation status of an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OfferStatus {
    /// Requested; the job has not started yet.
    Pending,
    /// A worker attempt is running (or was running and will be retried).
    Processing,
    /// The artifact is written and the record points at it.
    Complete,
    /// Generation was abandoned.
    Failed { reason: String },
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Processing => "processing",
            OfferStatus::Complete => "complete",
            OfferStatus::Failed { .. } => "failed",
        }
    }

    /// Rebuild a status from its stored label (and failure reason, if any).
    pub fn from_parts(label: &str, reason: Option<String>) -> DomainResult<Self> {
        match label {
            "pending" => Ok(OfferStatus::Pending),
            "processing" => Ok(OfferStatus::Processing),
            "complete" => Ok(OfferStatus::Complete),
            "failed" => Ok(OfferStatus::Failed {
                reason: reason.unwrap_or_default(),
            }),
            other => Err(DomainError::validation(format!("unknown offer status: {other}"))),
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            OfferStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// One offer generation request and its eventual result.
///
/// Invariants:
/// - `artifact_path` is empty until a generation attempt succeeds, and is never
///   cleared or replaced afterwards.
/// - `amount` is zero until the same successful attempt sets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRecord {
    id: OfferId,
    project_id: ProjectId,
    name: String,
    amount: Money,
    artifact_path: String,
    status: OfferStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl OfferRecord {
    /// Create a pending record for a new generation request.
    pub fn request(
        id: OfferId,
        project_id: ProjectId,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = match name.map(str::trim) {
            Some("") => return Err(DomainError::validation("offer name must not be blank")),
            Some(n) => n.to_string(),
            None => DEFAULT_OFFER_NAME.to_string(),
        };

        Ok(Self {
            id,
            project_id,
            name,
            amount: Money::ZERO,
            artifact_path: String::new(),
            status: OfferStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// Rebuild a record from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: OfferId,
        project_id: ProjectId,
        name: String,
        amount: Money,
        artifact_path: String,
        status: OfferStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            project_id,
            name,
            amount,
            artifact_path,
            status,
            created_at,
            updated_at,
            completed_at,
        }
    }

    pub fn id_typed(&self) -> OfferId {
        self.id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn artifact_path(&self) -> &str {
        &self.artifact_path
    }

    pub fn status(&self) -> &OfferStatus {
        &self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// True once an artifact has been written for this offer.
    pub fn is_ready(&self) -> bool {
        !self.artifact_path.is_empty()
    }

    /// A worker attempt started.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_ready() {
            return Err(DomainError::conflict("offer already completed"));
        }
        self.status = OfferStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    /// Record a successful generation. Only the first success is accepted.
    pub fn complete(
        &mut self,
        artifact_path: impl Into<String>,
        amount: Money,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.is_ready() {
            return Err(DomainError::conflict("offer already completed"));
        }
        let artifact_path = artifact_path.into();
        if artifact_path.trim().is_empty() {
            return Err(DomainError::validation("artifact path must not be empty"));
        }
        if amount.is_negative() {
            return Err(DomainError::invariant("offer amount must not be negative"));
        }

        self.artifact_path = artifact_path;
        self.amount = amount;
        self.status = OfferStatus::Complete;
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Record that generation was abandoned. A completed offer stays completed.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_ready() {
            return Err(DomainError::conflict("offer already completed"));
        }
        self.status = OfferStatus::Failed {
            reason: reason.into(),
        };
        self.updated_at = now;
        Ok(())
    }
}
