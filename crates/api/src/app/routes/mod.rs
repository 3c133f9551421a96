use axum::http::StatusCode;
use axum::{routing::get, Router};

use crate::app::errors;

pub mod offers;
pub mod system;

/// Router for the offer endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/projects/:project_id/offers", offers::router())
        .route("/offers/stream", get(offers::stream))
}

/// Run a store call off the async executor.
///
/// Every store is synchronous and the Postgres ones block on the runtime,
/// so route handlers must never call them inline.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = %e, "blocking task failed");
        errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
    })
}
