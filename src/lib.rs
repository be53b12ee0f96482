pub mod balancer;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod test_util;

pub use balancer::{
    AdmissionQueue, BackendAddress, BackendRegistry, BackendResponse, HealthChecker,
    PendingRequest, ProxyResult, Worker,
};
pub use config::Config;
pub use error::ProxyError;

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Candidate backends plus the health-filtered active rotation.
    pub registry: Arc<BackendRegistry>,
    /// Admission queue between the listener and the worker pool.
    pub queue: Arc<AdmissionQueue>,
    /// Connection pool shared by workers and the health checker.
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Build the shared state from configuration.
    pub fn from_config(config: Config) -> Self {
        let candidates: Vec<BackendAddress> = config
            .backends
            .candidate_urls()
            .into_iter()
            .map(BackendAddress::new)
            .collect();

        Self {
            registry: Arc::new(BackendRegistry::new(candidates)),
            queue: Arc::new(AdmissionQueue::new(config.balancer.queue_capacity)),
            http_client: reqwest::Client::new(),
            config,
        }
    }
}
