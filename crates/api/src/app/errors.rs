use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use projectdesk_infra::jobs::JobStoreError;
use projectdesk_infra::offers::{FetchError, SubmitError};

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Invalid(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        SubmitError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        SubmitError::Queue(e) => queue_error_to_response(e),
    }
}

pub fn fetch_error_to_response(err: FetchError) -> axum::response::Response {
    match err {
        FetchError::OfferNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        FetchError::NotGenerated(_) => json_error(StatusCode::NOT_FOUND, "not_generated", err.to_string()),
        FetchError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        FetchError::Artifact(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "artifact_error", e.to_string())
        }
    }
}

pub fn queue_error_to_response(err: JobStoreError) -> axum::response::Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
