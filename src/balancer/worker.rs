//! Forwarding workers.
//!
//! Each worker runs an unbounded dequeue-forward-settle loop. A failure on
//! one request never leaks into the next iteration: the request is settled
//! with the matching error status, the failure is logged, and the worker
//! moves on. Exactly one backend is tried per request; removing bad
//! backends from rotation is the health checker's job, not the per-request
//! path.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, Method};
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::balancer::queue::{AdmissionQueue, BackendResponse, PendingRequest, ProxyResult};
use crate::balancer::registry::{BackendAddress, BackendRegistry};
use crate::error::ProxyError;

/// One consumer loop of the worker pool.
pub struct Worker {
    id: usize,
    queue: Arc<AdmissionQueue>,
    registry: Arc<BackendRegistry>,
    http_client: reqwest::Client,
    forward_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<AdmissionQueue>,
        registry: Arc<BackendRegistry>,
        http_client: reqwest::Client,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            registry,
            http_client,
            forward_timeout,
        }
    }

    /// Run until the queue closes or shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let pending = tokio::select! {
                _ = shutdown.recv() => break,
                item = self.queue.dequeue() => match item {
                    Some(pending) => pending,
                    None => break,
                },
            };

            let PendingRequest {
                method,
                path_and_query,
                headers,
                body,
                response_tx,
                enqueued_at,
            } = pending;

            let Some(backend) = self.registry.select_next().await else {
                // No live backend: settle without issuing any network call.
                let _ = response_tx.send(Err(ProxyError::NoBackends));
                continue;
            };

            tracing::debug!(
                worker = self.id,
                backend = %backend,
                method = %method,
                path = %path_and_query,
                queued_ms = enqueued_at.elapsed().as_millis() as u64,
                "forwarding request"
            );

            tokio::select! {
                _ = shutdown.recv() => {
                    // Cancelled mid-flight: resolve the caller instead of
                    // leaving it hanging on the completion handle.
                    let _ = response_tx.send(Err(ProxyError::Closed));
                    break;
                }
                outcome = self.forward(&backend, &method, &path_and_query, &headers, &body) => {
                    let _ = response_tx.send(outcome);
                }
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    /// Forward one request to the chosen backend.
    ///
    /// The backend's status and body are passed through unmodified, whatever
    /// the status; only transport-level failures map to proxy errors.
    async fn forward(
        &self,
        backend: &BackendAddress,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> ProxyResult {
        let url = backend.url_for(path_and_query);

        let sent = self
            .http_client
            .request(method.clone(), &url)
            .headers(headers.clone())
            .body(body.clone())
            .timeout(self.forward_timeout)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(backend = %backend, timeout_secs = self.forward_timeout.as_secs(), "backend timed out");
                return Err(ProxyError::BackendTimeout);
            }
            Err(e) => {
                tracing::error!(backend = %backend, error = %e, "error forwarding to backend");
                return Err(ProxyError::Forward);
            }
        };

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        match response.bytes().await {
            Ok(body) => Ok(BackendResponse {
                status,
                content_type,
                body,
            }),
            Err(e) if e.is_timeout() => {
                tracing::warn!(backend = %backend, "backend timed out mid-body");
                Err(ProxyError::BackendTimeout)
            }
            Err(e) => {
                tracing::error!(backend = %backend, error = %e, "error reading backend response");
                Err(ProxyError::Forward)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, Method, StatusCode};
    use bytes::Bytes;
    use tokio::sync::oneshot;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    struct TestPool {
        queue: Arc<AdmissionQueue>,
        shutdown: broadcast::Sender<()>,
        handle: tokio::task::JoinHandle<()>,
    }

    /// Spawn a single worker over a fresh queue and the given backends.
    fn spawn_worker(backend_urls: Vec<String>, forward_timeout: Duration) -> TestPool {
        let queue = Arc::new(AdmissionQueue::new(16));
        let registry = Arc::new(BackendRegistry::new(
            backend_urls.into_iter().map(BackendAddress::new).collect(),
        ));
        let (shutdown, _) = broadcast::channel(1);
        let worker = Worker::new(
            0,
            queue.clone(),
            registry,
            reqwest::Client::new(),
            forward_timeout,
        );
        let handle = tokio::spawn(worker.run(shutdown.subscribe()));
        TestPool {
            queue,
            shutdown,
            handle,
        }
    }

    async fn submit(
        pool: &TestPool,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> oneshot::Receiver<ProxyResult> {
        pool.queue
            .enqueue(method, path_and_query.to_string(), headers, body)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_forward_success_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/generate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("generated text"),
            )
            .mount(&server)
            .await;

        let pool = spawn_worker(vec![server.uri()], Duration::from_secs(5));
        let rx = submit(&pool, Method::GET, "/v1/generate", HeaderMap::new(), Bytes::new()).await;

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from("generated text"));

        let _ = pool.shutdown.send(());
        pool.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_backend_error_status_is_relayed_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad payload"))
            .mount(&server)
            .await;

        let pool = spawn_worker(vec![server.uri()], Duration::from_secs(5));
        let rx = submit(&pool, Method::POST, "/v1/score", HeaderMap::new(), Bytes::from("{}")).await;

        // Not remapped to a proxy error: the caller sees the backend's 422.
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.body, Bytes::from("bad payload"));

        let _ = pool.shutdown.send(());
        pool.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_headers_and_body_are_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generate"))
            .and(header("x-request-tag", "alpha"))
            .and(body_string("ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .expect(1)
            .mount(&server)
            .await;

        let pool = spawn_worker(vec![server.uri()], Duration::from_secs(5));
        let mut headers = HeaderMap::new();
        headers.insert("x-request-tag", "alpha".parse().unwrap());
        let rx = submit(&pool, Method::POST, "/v1/generate", headers, Bytes::from("ping")).await;

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.body, Bytes::from("pong"));

        let _ = pool.shutdown.send(());
        pool.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_active_backends_settles_503() {
        let pool = spawn_worker(vec![], Duration::from_secs(5));
        let rx = submit(&pool, Method::GET, "/anything", HeaderMap::new(), Bytes::new()).await;

        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(ProxyError::NoBackends)));

        let _ = pool.shutdown.send(());
        pool.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_backend_settles_504_and_worker_continues() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let pool = spawn_worker(vec![server.uri()], Duration::from_millis(100));

        let slow_rx = submit(&pool, Method::GET, "/slow", HeaderMap::new(), Bytes::new()).await;
        let outcome = slow_rx.await.unwrap();
        assert!(matches!(outcome, Err(ProxyError::BackendTimeout)));

        // The timeout was isolated to that request; the next item is served.
        let fast_rx = submit(&pool, Method::GET, "/fast", HeaderMap::new(), Bytes::new()).await;
        let response = fast_rx.await.unwrap().unwrap();
        assert_eq!(response.body, Bytes::from("ok"));

        let _ = pool.shutdown.send(());
        pool.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_error_settles_500_and_worker_continues() {
        // Nothing listens on this address.
        let dead = "http://127.0.0.1:1".to_string();
        let pool = spawn_worker(vec![dead], Duration::from_secs(5));

        let rx = submit(&pool, Method::GET, "/x", HeaderMap::new(), Bytes::new()).await;
        assert!(matches!(rx.await.unwrap(), Err(ProxyError::Forward)));

        let rx = submit(&pool, Method::GET, "/y", HeaderMap::new(), Bytes::new()).await;
        assert!(matches!(rx.await.unwrap(), Err(ProxyError::Forward)));

        let _ = pool.shutdown.send(());
        pool.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let pool = spawn_worker(vec![], Duration::from_secs(5));
        let _ = pool.shutdown.send(());
        pool.handle.await.unwrap();
    }
}
