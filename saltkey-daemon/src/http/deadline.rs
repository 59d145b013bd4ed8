//! Per-request deadline.
//!
//! Every request runs under the server's maximum timeout. A caller may ask
//! for a shorter one with `x-request-timeout-ms`; longer requests are capped.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;

/// Header carrying the caller's requested deadline in milliseconds.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

/// Deadline for a request given its headers and the server maximum.
pub fn effective_timeout(headers: &HeaderMap, max: Duration) -> Duration {
    headers
        .get(REQUEST_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map_or(max, |ms| Duration::from_millis(ms).min(max))
}

/// Axum middleware answering 503 when the handler misses its deadline.
pub async fn enforce_deadline(
    State(max): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    let timeout = effective_timeout(request.headers(), max);
    let path = request.uri().path().to_string();

    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(
                path = %path,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Request deadline exceeded"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "request timed out" })),
            )
                .into_response()
        }
    }
}
