//! POST /api/reindex: enqueues a reindex job for the external indexer.

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::{
    core::{app_state::AppState, reindex_queue::ReindexJob},
    error_handler::{AppError, AppResult},
    routes::reindex::reindex_request::{ReindexRequest, ReindexResponse},
};

/// Handler: POST /api/reindex
///
/// Answers `202 Accepted` once the job is queued; the queue being full is a
/// retryable `503`.
pub async fn reindex_route(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReindexRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(body) = payload?;
    let job = ReindexJob::new(body.source, body.limit);
    let task_id = job.task_id;

    if let Err(err) = state.reindex.enqueue(job) {
        warn!(%task_id, source = body.source.as_str(), error = %err, "reindex_route: enqueue failed");
        return Err(AppError::from(err));
    }

    info!(%task_id, source = body.source.as_str(), limit = ?body.limit, "reindex_route: queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(ReindexResponse {
            task_id,
            status: "queued",
        }),
    )
        .into_response())
}
