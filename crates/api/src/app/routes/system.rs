use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::errors;
use crate::app::routes::blocking;
use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let backend = services.backend();
    let stats = match blocking(move || services.offers().job_stats()).await {
        Ok(Ok(stats)) => stats,
        Ok(Err(e)) => return errors::queue_error_to_response(e),
        Err(resp) => return resp,
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "backend": backend,
            "jobs": stats,
        })),
    )
        .into_response()
}
