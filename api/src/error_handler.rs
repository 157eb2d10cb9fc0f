use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use search_engine::{SearchError, ValidationError, error_handler::ConfigError};
use thiserror::Error;

use crate::core::{
    http::response_envelope::{ApiError, ApiErrorDetail, ApiResponse},
    reindex_queue::EnqueueError,
};

/// Public application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // --- Boot / config ---
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind listener")]
    Bind(#[source] std::io::Error),

    #[error("server error")]
    Server(#[source] std::io::Error),

    // --- Request ---
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request parameters rejected before reaching the engine.
    #[error("{0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Enqueue(#[from] EnqueueError),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Bind(_) | AppError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) | AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::Search(err) => match err {
                SearchError::Validation { .. } | SearchError::InvalidCursor { .. } => {
                    StatusCode::BAD_REQUEST
                }
                SearchError::ProviderUnavailable { .. } | SearchError::Overloaded { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                SearchError::ProviderRejected { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Enqueue(EnqueueError::Full) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Enqueue(EnqueueError::Closed) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Bind(_) => "BIND_ERROR",
            AppError::Server(_) => "SERVER_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Invalid(reason) => reason.code(),
            AppError::Search(err) => err.code(),
            AppError::Enqueue(EnqueueError::Full) => "REINDEX_QUEUE_FULL",
            AppError::Enqueue(EnqueueError::Closed) => "REINDEX_UNAVAILABLE",
        }
    }

    fn detail(&self) -> ApiErrorDetail {
        match self {
            AppError::Invalid(reason) => ApiErrorDetail::default().with_path(field_of(reason)),
            AppError::Search(err) => {
                let detail =
                    ApiErrorDetail::default().with_stage(err.stage().as_str(), err.retryable());
                match err {
                    SearchError::Validation { reason, .. } => detail.with_path(field_of(reason)),
                    SearchError::InvalidCursor { .. } => detail
                        .with_path(Some("cursor".to_string()))
                        .with_hint("Drop the cursor and restart from the first page."),
                    _ if err.retryable() => detail.with_hint("Retry the same request later."),
                    _ => detail,
                }
            }
            AppError::Enqueue(EnqueueError::Full) => ApiErrorDetail::default()
                .with_hint("Too many pending reindex jobs; retry later.")
                .with_stage("rejected", true),
            _ => ApiErrorDetail::default(),
        }
    }
}

/// Request field a validation failure refers to.
fn field_of(reason: &ValidationError) -> Option<String> {
    let field = match reason {
        ValidationError::EmptyQuery
        | ValidationError::QueryTooLong { .. }
        | ValidationError::UnsafeRegex(_) => "q".to_string(),
        ValidationError::InvalidPage | ValidationError::WindowTooDeep { .. } => "page".to_string(),
        ValidationError::InvalidPageSize { .. } => "size".to_string(),
        ValidationError::UnknownFilter(key) | ValidationError::UnsupportedFilter { key, .. } => {
            format!("filters.{key}")
        }
        ValidationError::UnsupportedMode { .. } => "mode".to_string(),
        _ => return None,
    };
    Some(field)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = ApiError::new(self.error_code(), self.to_string()).with_detail(self.detail());
        ApiResponse::failure(error).into_response_with_status(status)
    }
}

/// Handy result alias used across handlers.
pub type AppResult<T> = Result<T, AppError>;

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_engine::{RequestStage, regex_safety::RegexRejection};

    #[test]
    fn search_errors_map_to_http_statuses() {
        let invalid = AppError::from(SearchError::InvalidCursor {
            stage: RequestStage::Rejected,
        });
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.error_code(), "INVALID_CURSOR");

        let overloaded = AppError::from(SearchError::Overloaded {
            stage: RequestStage::Rejected,
        });
        assert_eq!(overloaded.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(overloaded.detail().retryable, Some(true));
    }

    #[test]
    fn validation_details_name_the_field() {
        let err = AppError::from(SearchError::Validation {
            stage: RequestStage::Rejected,
            reason: ValidationError::UnsafeRegex(RegexRejection::ProbeSaturated),
        });
        let detail = err.detail();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "UNSAFE_REGEX");
        assert_eq!(detail.path.as_deref(), Some("q"));
        assert_eq!(detail.stage, Some("rejected"));
        assert_eq!(detail.retryable, Some(false));

        let filter = AppError::from(ValidationError::UnknownFilter("lang".into()));
        assert_eq!(filter.detail().path.as_deref(), Some("filters.lang"));
    }

    #[test]
    fn full_reindex_queue_is_unavailable() {
        let err = AppError::from(EnqueueError::Full);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code(), "REINDEX_QUEUE_FULL");
    }
}
