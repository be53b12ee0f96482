//! Core load-balancing machinery.
//!
//! This module provides:
//! - Backend registry with round-robin selection over the healthy subset
//! - Bounded admission queue with fail-fast backpressure
//! - Worker pool forwarding queued requests to backends
//! - Periodic health checker maintaining the active set

mod health;
mod queue;
mod registry;
mod worker;

pub use health::HealthChecker;
pub use queue::{AdmissionQueue, BackendResponse, PendingRequest, ProxyResult};
pub use registry::{BackendAddress, BackendRegistry};
pub use worker::Worker;
