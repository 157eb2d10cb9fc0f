//! JSON envelope for failures and the health snapshot.
//!
//! `/api/search` answers with its bare result object on success. Every
//! failure, whatever the route, is `{"success": false, "error": {...}}` with a
//! stable `code` clients can branch on.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Machine-readable code such as `INVALID_CURSOR` or `PROVIDER_UNAVAILABLE`.
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ApiErrorDetail>,
}

/// Where a request went wrong and what the client can do about it.
#[derive(Debug, Serialize, Default, PartialEq, Eq)]
pub struct ApiErrorDetail {
    /// Request field, like `cursor` or `filters.year`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Search stage that ended the request (`rejected`, `failed`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'static str>,
    /// The identical request may succeed later.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    /// Wraps a payload; `success` tells whether it describes a healthy state.
    pub fn with_data(data: T, success: bool) -> Self {
        Self {
            success,
            data: Some(data),
            error: None,
        }
    }

    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl ApiResponse<()> {
    pub fn failure(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Appends `detail` unless it carries nothing.
    pub fn with_detail(mut self, detail: ApiErrorDetail) -> Self {
        if detail != ApiErrorDetail::default() {
            self.details.push(detail);
        }
        self
    }
}

impl ApiErrorDetail {
    pub fn with_path(mut self, path: Option<String>) -> Self {
        self.path = path;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_stage(mut self, stage: &'static str, retryable: bool) -> Self {
        self.stage = Some(stage);
        self.retryable = Some(retryable);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn failure_omits_data_and_empty_details() {
        let body = ApiResponse::failure(
            ApiError::new("BAD_REQUEST", "bad").with_detail(ApiErrorDetail::default()),
        );
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "success": false, "error": { "code": "BAD_REQUEST", "message": "bad" } })
        );
    }

    #[test]
    fn detail_builders_fill_only_what_is_set() {
        let detail = ApiErrorDetail::default()
            .with_path(Some("cursor".into()))
            .with_hint("restart")
            .with_stage("rejected", false);
        assert_eq!(
            serde_json::to_value(&detail).unwrap(),
            json!({ "path": "cursor", "hint": "restart", "stage": "rejected", "retryable": false })
        );
    }

    #[test]
    fn unhealthy_snapshot_is_not_a_success() {
        let body = ApiResponse::with_data(json!({ "ok": false }), false);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["data"]["ok"], false);
        assert!(v.get("error").is_none());
    }
}
