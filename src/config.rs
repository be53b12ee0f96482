//! Configuration for the load balancer.

use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the balancer process.
///
/// All values are fixed at startup; nothing is reloaded at runtime.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listen address for the front-end HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Candidate backend addresses.
///
/// Backends can be listed explicitly as base URLs, or generated from a host
/// list crossed with a port range (fleets that run one agent per port).
/// Both sources are combined.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BackendsConfig {
    /// Explicit backend base URLs, e.g. `["http://10.0.0.5:8000"]`.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Hosts to expand against `ports`.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Inclusive port range applied to every entry in `hosts`.
    #[serde(default)]
    pub ports: Option<PortRange>,
}

/// Inclusive port range.
#[derive(Debug, Clone, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl BackendsConfig {
    /// Full candidate list: explicit URLs followed by the hosts x ports
    /// expansion (port-major order, matching the deployment layout).
    pub fn candidate_urls(&self) -> Vec<String> {
        let mut urls = self.urls.clone();
        if let Some(range) = &self.ports {
            for port in range.start..=range.end {
                for host in &self.hosts {
                    urls.push(format!("http://{}:{}", host, port));
                }
            }
        }
        urls
    }
}

/// Queue and worker-pool tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct BalancerConfig {
    /// Maximum number of requests waiting for a worker. Enqueues beyond
    /// this are rejected immediately with 429.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of concurrent forwarding workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-request timeout for forwarded calls, in seconds.
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_secs: u64,
}

impl BalancerConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            forward_timeout_secs: default_forward_timeout(),
        }
    }
}

/// Health-probe cadence and timeout.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Seconds between probe cycles.
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    /// Per-probe timeout, in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_queue_capacity() -> usize {
    1000
}
fn default_workers() -> usize {
    32
}
fn default_forward_timeout() -> u64 {
    30
}
fn default_health_interval() -> u64 {
    5
}
fn default_probe_timeout() -> u64 {
    2
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (BALANCER__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("BALANCER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("backends.urls")
                    .with_list_parse_key("backends.hosts"),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;

        if config.backends.candidate_urls().is_empty() {
            return Err(ConfigError::Message(
                "no backend candidates configured; set backends.urls or backends.hosts + backends.ports".to_string(),
            ));
        }

        Ok(config)
    }
}
