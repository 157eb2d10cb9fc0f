//! Rewrites plain-text error responses produced outside the handlers
//! (extractor rejections, unknown routes, wrong methods) into the JSON
//! error envelope. Responses that are already JSON pass through untouched.

use axum::{
    body::{Body, Bytes},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::core::http::response_envelope::{ApiError, ApiErrorDetail, ApiResponse};

const REQUEST_ID: &str = "X-Request-Id";

/// Error bodies are short; anything larger is left alone.
const MAX_REWRITE_BODY: usize = 64 * 1024;

async fn take_body(res: Response) -> (axum::http::response::Parts, Bytes) {
    let (parts, body) = res.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_REWRITE_BODY)
        .await
        .unwrap_or_default();
    (parts, bytes)
}

fn is_json(parts: &axum::http::response::Parts) -> bool {
    parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Field named in a serde error such as "unknown variant `fuzzy`... at `mode`".
fn guess_path_from_serde_msg(msg: &str) -> Option<String> {
    for key in ["filters", "cursor", "mode", "page", "size", "source", "limit", "q"] {
        if msg.contains(&format!("`{key}`")) || msg.contains(&format!("{key}:")) {
            return Some(key.to_string());
        }
    }
    None
}

fn ensure_request_id(parts: &mut axum::http::response::Parts) {
    let present = parts
        .headers
        .get(REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| !v.trim().is_empty());
    if present {
        return;
    }
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000);
    if let Ok(id) = HeaderValue::from_str(&format!("req-{nanos}")) {
        parts.headers.insert(REQUEST_ID, id);
    }
}

fn code_for(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "BAD_REQUEST",
        StatusCode::UNPROCESSABLE_ENTITY => "UNPROCESSABLE_ENTITY",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::METHOD_NOT_ALLOWED => "METHOD_NOT_ALLOWED",
        StatusCode::UNSUPPORTED_MEDIA_TYPE => "UNSUPPORTED_MEDIA_TYPE",
        _ => "ERROR",
    }
}

pub async fn json_error_mapper(req: Request<Body>, next: Next) -> Response {
    let res = next.run(req).await;
    let status = res.status();

    if !status.is_client_error() {
        return res;
    }

    let (mut parts, bytes) = take_body(res).await;
    if is_json(&parts) {
        return Response::from_parts(parts, bytes.into());
    }
    ensure_request_id(&mut parts);

    let original = String::from_utf8_lossy(&bytes);
    let message = match original.trim() {
        "" => status.canonical_reason().unwrap_or("request failed").to_string(),
        text => text.to_string(),
    };

    let detail = ApiErrorDetail::default().with_path(guess_path_from_serde_msg(&message));
    let detail = if message.contains("expected a map") || message.contains("expected struct") {
        detail.with_hint("Expected a JSON object here (e.g. { \"q\": \"\\\\frac\" }).")
    } else if message.contains("Content-Type") {
        detail.with_hint("Send the body with `Content-Type: application/json`.")
    } else {
        detail
    };

    let envelope =
        ApiResponse::failure(ApiError::new(code_for(status), message).with_detail(detail));
    let body = match serde_json::to_vec(&envelope) {
        Ok(v) => v,
        Err(_) => bytes.to_vec(),
    };

    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    Response::from_parts(parts, body.into())
}
