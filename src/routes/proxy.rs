//! Front-end boundary: the catch-all proxy route.
//!
//! Every method and path is accepted; the request is snapshotted, admitted
//! through the queue, and the worker's settled outcome is relayed back.
//! The handler never inspects bodies and never retries.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::error::ProxyError;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    // A fallback instead of explicit routes: any method, any path.
    Router::new().fallback(forward).with_state(state)
}

async fn forward(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to read request body");
            return ProxyError::Forward.into_response();
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    // The backend must see its own authority, not ours; reqwest sets the
    // correct Host for the target it connects to.
    let mut headers = parts.headers;
    headers.remove(header::HOST);

    let completion = match state
        .queue
        .enqueue(parts.method, path_and_query, headers, body)
        .await
    {
        Ok(rx) => rx,
        Err(e) => return e.into_response(),
    };

    match completion.await {
        Ok(Ok(backend_response)) => {
            let mut builder = Response::builder().status(backend_response.status);
            if let Some(content_type) = backend_response.content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            match builder.body(Body::from(backend_response.body)) {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build relay response");
                    ProxyError::Forward.into_response()
                }
            }
        }
        Ok(Err(e)) => e.into_response(),
        // Completion handle dropped without settling: shutdown path.
        Err(_) => ProxyError::Closed.into_response(),
    }
}
