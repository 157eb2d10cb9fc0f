//! POST /api/search: runs one query through the engine.

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
};
use search_engine::SearchQuery;
use tracing::{debug, warn};

use crate::{
    core::app_state::AppState,
    error_handler::{AppError, AppResult},
    routes::search::{search_request::SearchRequest, search_response::SearchResponse},
};

/// Handler: POST /api/search
///
/// # Example
/// ```bash
/// curl -X POST http://127.0.0.1:8000/api/search \
///   -H 'content-type: application/json' \
///   -d '{"q":"\\frac","mode":"literal","filters":{"year":2020},"size":20}'
/// ```
pub async fn search_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> AppResult<Json<SearchResponse>> {
    let request_id = headers
        .get("X-Request-Id")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("-");

    let Json(body) = payload?;
    let query = SearchQuery::parse(body.into_params()?)?;
    debug!(
        request_id,
        mode = query.mode.as_str(),
        filters = query.filters.len(),
        has_cursor = query.cursor.is_some(),
        "search_route: start"
    );

    match state.router.search(query).await {
        Ok(result) => {
            debug!(
                request_id,
                hits = result.hits.len(),
                total = result.total,
                degraded = result.degraded_hits,
                "search_route: success"
            );
            Ok(Json(SearchResponse::from(result)))
        }
        Err(err) => {
            warn!(
                request_id,
                code = err.code(),
                stage = %err.stage(),
                retryable = err.retryable(),
                error = %err,
                "search_route: search failed"
            );
            Err(AppError::from(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::app_state::test_support::{body_json, unreachable_state};
    use axum::{http::StatusCode, response::IntoResponse};
    use serde_json::json;

    async fn call(body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let (state, _rx) = unreachable_state(4);
        let request: SearchRequest = serde_json::from_value(body).unwrap();
        let resp = search_route(State(state), HeaderMap::new(), Ok(Json(request)))
            .await
            .into_response();
        body_json(resp).await
    }

    #[tokio::test]
    async fn regex_on_literal_provider_is_bad_request() {
        let (status, body) = call(json!({"q": "a+b", "mode": "regex"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNSUPPORTED_MODE");
        assert_eq!(body["error"]["details"][0]["stage"], "rejected");
    }

    #[tokio::test]
    async fn empty_query_is_bad_request() {
        let (status, body) = call(json!({"q": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_QUERY");
        assert_eq!(body["error"]["details"][0]["path"], "q");
    }

    #[tokio::test]
    async fn garbage_cursor_is_invalid_cursor() {
        let (status, body) = call(json!({"q": "frac", "cursor": "not-a-token"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_CURSOR");
        assert_eq!(body["error"]["details"][0]["path"], "cursor");
    }

    #[tokio::test]
    async fn unreachable_provider_is_retryable_503() {
        let (status, body) = call(json!({"q": "frac"})).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "PROVIDER_UNAVAILABLE");
        assert_eq!(body["error"]["details"][0]["retryable"], true);
        assert_eq!(body["error"]["details"][0]["stage"], "failed");
    }
}
