use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::routes::blocking;
use crate::app::services::{self, AppServices};
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_offers).post(submit_offer))
        .route("/:offer_id", get(get_offer))
        .route("/:offer_id/download", get(download_offer))
}

/// POST /projects/:project_id/offers
///
/// Records the request and queues generation. Answers 202 with the pending
/// record; poll it (or watch `/offers/stream`) for the result.
pub async fn submit_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
    body: Option<Json<dto::SubmitOfferRequest>>,
) -> axum::response::Response {
    let project_id = match dto::parse_project_id(&project_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let name = body.and_then(|Json(b)| b.name);

    let submitted = blocking(move || services.offers().submit(project_id, name.as_deref())).await;
    match submitted {
        Ok(Ok(offer)) => (StatusCode::ACCEPTED, Json(dto::OfferResponse::from(&offer))).into_response(),
        Ok(Err(e)) => errors::submit_error_to_response(e),
        Err(resp) => resp,
    }
}

pub async fn list_offers(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
) -> axum::response::Response {
    let project_id = match dto::parse_project_id(&project_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match blocking(move || services.offers().list_for_project(project_id)).await {
        Ok(Ok(offers)) => Json(dto::OfferListResponse {
            project_id,
            offers: offers.iter().map(dto::OfferResponse::from).collect(),
        })
        .into_response(),
        Ok(Err(e)) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        Err(resp) => resp,
    }
}

pub async fn get_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project_id, offer_id)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, offer_id) = match (dto::parse_project_id(&project_id), dto::parse_offer_id(&offer_id)) {
        (Ok(p), Ok(o)) => (p, o),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    match blocking(move || services.offers().get_for_project(project_id, offer_id)).await {
        Ok(Ok(Some(offer))) => Json(dto::OfferResponse::from(&offer)).into_response(),
        Ok(Ok(None)) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "offer not found"),
        Ok(Err(e)) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        Err(resp) => resp,
    }
}

/// GET /projects/:project_id/offers/:offer_id/download
///
/// Streams the generated PDF. 404 until the offer has an artifact.
pub async fn download_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project_id, offer_id)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, offer_id) = match (dto::parse_project_id(&project_id), dto::parse_offer_id(&offer_id)) {
        (Ok(p), Ok(o)) => (p, o),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    match blocking(move || services.offers().fetch_artifact(project_id, offer_id)).await {
        Ok(Ok(artifact)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, artifact.content_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", artifact.file_name),
                ),
            ],
            artifact.bytes,
        )
            .into_response(),
        Ok(Err(e)) => errors::fetch_error_to_response(e),
        Err(resp) => resp,
    }
}

/// GET /offers/stream
///
/// Server-sent events for every generation outcome (`offer.completed` /
/// `offer.failed`). `?project_id=` limits the stream to one project.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::StreamQuery>,
) -> axum::response::Response {
    let project_id = match query.project_id.as_deref().map(dto::parse_project_id).transpose() {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    services::offer_sse_stream(services, project_id).into_response()
}
