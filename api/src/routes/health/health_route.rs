//! GET /api/health: provider reachability snapshot.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Response};

use crate::core::{app_state::AppState, http::response_envelope::ApiResponse};

/// `200` with the snapshot when the provider answers, `503` otherwise.
pub async fn health_route(State(state): State<Arc<AppState>>) -> Response {
    let status = state.health.check().await;
    let ok = status.ok;
    let code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    ApiResponse::with_data(status, ok).into_response_with_status(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::app_state::test_support::{body_json, unreachable_state};

    #[tokio::test]
    async fn unreachable_provider_reports_503_with_snapshot() {
        let (state, _rx) = unreachable_state(1);

        let (status, body) = body_json(health_route(State(state)).await).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["provider"], "zoekt");
        assert_eq!(body["data"]["ok"], false);
    }
}
