use std::sync::Arc;

use axum::middleware;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inference_balancer::{logging, routes, AppState, Config, HealthChecker, Worker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting inference load balancer");

    let state = Arc::new(AppState::from_config(config.clone()));
    tracing::info!(
        backends = state.registry.all().len(),
        workers = config.balancer.workers,
        queue_capacity = config.balancer.queue_capacity,
        "Configured"
    );

    // Spawn background tasks: one health checker, N forwarding workers.
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut tasks = Vec::with_capacity(config.balancer.workers + 1);

    let checker = HealthChecker::new(
        state.registry.clone(),
        state.http_client.clone(),
        config.health.interval(),
        config.health.probe_timeout(),
    );
    tasks.push(tokio::spawn(checker.run(shutdown_tx.subscribe())));

    for id in 0..config.balancer.workers {
        let worker = Worker::new(
            id,
            state.queue.clone(),
            state.registry.clone(),
            state.http_client.clone(),
            config.balancer.forward_timeout(),
        );
        tasks.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));
    }

    // Build router
    let app = routes::proxy::router(state.clone())
        .layer(middleware::from_fn(logging::request_logger))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop admitting work, then cancel the background tasks and wait for
    // each to acknowledge before the shared HTTP client is dropped.
    tracing::info!("Shutting down");
    state.queue.close().await;
    let _ = shutdown_tx.send(());
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
