use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};

/// Middleware that logs every proxied request with its outcome and latency.
///
/// Server-error outcomes (backend failures, overload rejections mapped to
/// 5xx) log at WARN so they stand out from routine traffic.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis() as u64;

    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms,
            "proxied request"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms,
            "proxied request"
        );
    }

    response
}
