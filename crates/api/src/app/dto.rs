use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use projectdesk_offers::{OfferId, OfferRecord, ProjectId};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SubmitOfferRequest {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub project_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct OfferResponse {
    pub id: OfferId,
    pub project_id: ProjectId,
    pub name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Decimal string, e.g. `"700.00"`.
    pub amount: String,
    pub amount_minor: i64,
    pub artifact_path: String,
    pub ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&OfferRecord> for OfferResponse {
    fn from(offer: &OfferRecord) -> Self {
        Self {
            id: offer.id_typed(),
            project_id: offer.project_id(),
            name: offer.name().to_string(),
            status: offer.status().as_str(),
            failure_reason: offer.status().failure_reason().map(str::to_string),
            amount: offer.amount().to_string(),
            amount_minor: offer.amount().minor_units(),
            artifact_path: offer.artifact_path().to_string(),
            ready: offer.is_ready(),
            created_at: offer.created_at(),
            updated_at: offer.updated_at(),
            completed_at: offer.completed_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OfferListResponse {
    pub project_id: ProjectId,
    pub offers: Vec<OfferResponse>,
}

// -------------------------
// Path parsing
// -------------------------

pub fn parse_project_id(s: &str) -> Result<ProjectId, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "invalid_id",
            "invalid project id",
        )
    })
}

pub fn parse_offer_id(s: &str) -> Result<OfferId, axum::response::Response> {
    s.parse().map_err(|_| {
        errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_id", "invalid offer id")
    })
}
