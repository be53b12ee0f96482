//! Periodic health checking of the backend pool.
//!
//! Every cycle probes every configured candidate, not just the currently
//! active ones, so a backend that was dead earlier is rediscovered as soon
//! as it answers again. The set of alive backends replaces the active set
//! wholesale. Probe failures only change future routing; they are never
//! surfaced to callers and never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::balancer::registry::{BackendAddress, BackendRegistry};

const PROBE_PATH: &str = "/health";

pub struct HealthChecker {
    registry: Arc<BackendRegistry>,
    http_client: reqwest::Client,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<BackendRegistry>,
        http_client: reqwest::Client,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            http_client,
            interval,
            probe_timeout,
        }
    }

    /// Run probe cycles until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            probe_timeout_secs = self.probe_timeout.as_secs(),
            candidates = self.registry.all().len(),
            "health checker starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // Consume the immediate first tick: all candidates start active, so
        // the first real probe cycle runs after one full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let alive = self.probe_all().await;
                    tracing::info!(
                        active = alive.len(),
                        total = self.registry.all().len(),
                        "health cycle complete"
                    );
                    self.registry.replace_active(alive).await;
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("health checker stopped");
    }

    /// Probe every candidate concurrently and collect the alive ones.
    ///
    /// Concurrency bounds a cycle by the slowest single probe timeout, not
    /// the sum across the pool.
    async fn probe_all(&self) -> Vec<BackendAddress> {
        let probes = self.registry.all().iter().map(|backend| async move {
            let alive = self.probe(backend).await;
            (backend.clone(), alive)
        });

        join_all(probes)
            .await
            .into_iter()
            .filter_map(|(backend, alive)| alive.then_some(backend))
            .collect()
    }

    /// One liveness probe: alive iff `GET {backend}/health` answers 200
    /// within the probe timeout.
    async fn probe(&self, backend: &BackendAddress) -> bool {
        let result = self
            .http_client
            .get(backend.url_for(PROBE_PATH))
            .timeout(self.probe_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                tracing::warn!(backend = %backend, status = %response.status(), "health check failed: non-success status");
                false
            }
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn checker(candidates: Vec<String>, probe_timeout: Duration) -> (HealthChecker, Arc<BackendRegistry>) {
        let registry = Arc::new(BackendRegistry::new(
            candidates.into_iter().map(BackendAddress::new).collect(),
        ));
        let checker = HealthChecker::new(
            registry.clone(),
            reqwest::Client::new(),
            Duration::from_secs(5),
            probe_timeout,
        );
        (checker, registry)
    }

    async fn healthy_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_two_of_three_alive() {
        let up_a = healthy_server().await;
        let up_b = healthy_server().await;
        // Nothing listens here.
        let down = "http://127.0.0.1:1".to_string();

        let (checker, registry) =
            checker(vec![up_a.uri(), down, up_b.uri()], Duration::from_millis(500));

        let alive = checker.probe_all().await;
        assert_eq!(
            alive,
            vec![BackendAddress::new(up_a.uri()), BackendAddress::new(up_b.uri())]
        );

        registry.replace_active(alive).await;
        let (active, cursor) = registry.snapshot_active().await;
        assert_eq!(active.len(), 2);
        assert_eq!(cursor, 0);
    }

    #[tokio::test]
    async fn test_non_200_is_dead() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (checker, _) = checker(vec![server.uri()], Duration::from_millis(500));
        assert!(checker.probe_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_probe_is_dead() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let (checker, _) = checker(vec![server.uri()], Duration::from_millis(50));
        assert!(checker.probe_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_dead_backend_is_rediscovered() {
        let server = healthy_server().await;
        let (checker, registry) = checker(vec![server.uri()], Duration::from_millis(500));

        // A previous cycle emptied the active set; the next cycle still
        // probes every candidate and brings the backend back.
        registry.replace_active(vec![]).await;
        assert_eq!(registry.select_next().await, None);

        let alive = checker.probe_all().await;
        registry.replace_active(alive).await;
        assert_eq!(
            registry.select_next().await,
            Some(BackendAddress::new(server.uri()))
        );
    }

    #[tokio::test]
    async fn test_idempotent_cycle_keeps_active_set() {
        let server = healthy_server().await;
        let (checker, registry) = checker(vec![server.uri()], Duration::from_millis(500));

        for _ in 0..3 {
            let alive = checker.probe_all().await;
            registry.replace_active(alive).await;
        }

        let (active, cursor) = registry.snapshot_active().await;
        assert_eq!(active, vec![BackendAddress::new(server.uri())]);
        assert_eq!(cursor, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (checker, _) = checker(vec!["http://127.0.0.1:1".to_string()], Duration::from_millis(50));
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = tokio::spawn(checker.run(shutdown_tx.subscribe()));

        let _ = shutdown_tx.send(());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("health checker must exit on shutdown")
            .unwrap();
    }
}
