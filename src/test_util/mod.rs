//! Shared helpers for unit and integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{
    BackendsConfig, BalancerConfig, Config, HealthConfig, LoggingConfig, ServerConfig,
};
use crate::{AppState, Worker};

/// A config with test-friendly sizes and the given explicit backends.
pub fn test_config(backend_urls: Vec<String>) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        backends: BackendsConfig {
            urls: backend_urls,
            hosts: vec![],
            ports: None,
        },
        balancer: BalancerConfig {
            queue_capacity: 16,
            workers: 2,
            forward_timeout_secs: 30,
        },
        health: HealthConfig {
            interval_secs: 1,
            probe_timeout_secs: 1,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}

/// Spawn `count` workers over the state's queue and registry.
///
/// Returns the join handles; send on `shutdown` to stop them.
pub fn spawn_workers(
    state: &Arc<AppState>,
    count: usize,
    forward_timeout: Duration,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| {
            let worker = Worker::new(
                id,
                state.queue.clone(),
                state.registry.clone(),
                state.http_client.clone(),
                forward_timeout,
            );
            tokio::spawn(worker.run(shutdown.subscribe()))
        })
        .collect()
}
