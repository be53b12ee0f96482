//! Error types for the proxy path.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced to callers by the proxy itself.
///
/// Backend responses, including error-status ones, are relayed verbatim and
/// never pass through this type. Display strings double as the `detail`
/// field of the JSON error body, so internals are logged, not echoed.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The admission queue is at capacity.
    #[error("Too many requests")]
    QueueFull,

    /// The active backend set is empty.
    #[error("No backends available")]
    NoBackends,

    /// The forwarded request did not complete within the per-request timeout.
    #[error("Backend timeout")]
    BackendTimeout,

    /// Any other forwarding failure (connection refused, protocol error, ...).
    #[error("Internal error")]
    Forward,

    /// The proxy is shutting down and abandoned the request.
    #[error("Service unavailable")]
    Closed,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::QueueFull => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::NoBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Forward => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "detail": self.to_string() }));
        (self.status(), body).into_response()
    }
}
