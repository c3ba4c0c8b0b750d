//! Hub Backplane
//!
//! Runs the routing backplane for one server process.
//!
//! # Servers
//!
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8082)
//!
//! Client connections are accepted by the hosting transport, which drives the
//! [`RoutingFrontend`] of each hub.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus metrics recorder
//! 4. Build the coordinator state store (memory or Redis)
//! 5. Start the actor runtime
//! 6. Create one routing frontend per configured hub
//! 7. Start health HTTP server (liveness, readiness, metrics)
//! 8. Wait for shutdown signal
//!
//! # Shutdown Flow
//!
//! 1. Mark not ready
//! 2. Shut down every frontend (unsubscribe, deregister presence)
//! 3. Stop the health server and the actor runtime

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use backplane_service::actors::ActorRuntime;
use backplane_service::config::{Config, StateStoreKind};
use backplane_service::errors::BackplaneError;
use backplane_service::observability::{health_router, init_metrics_recorder, HealthState};
use backplane_service::routing::RoutingFrontend;
use backplane_service::state::{MemoryStateStore, RedisStateStore, StateStore};
use common::config::ObservabilityConfig;
use common::types::ServerId;
use futures::future::join_all;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it carries the log settings
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(&config.observability);

    info!("Starting Hub Backplane");
    info!(
        server_id = %config.server_id,
        hubs = ?config.hubs,
        state_store = ?config.state_store,
        health_bind_address = %config.health_bind_address,
        entity_cleanup_period_seconds = config.entity_cleanup_period_seconds,
        presence_heartbeat_interval_seconds = config.presence_heartbeat_interval_seconds,
        presence_expiry_seconds = config.presence_expiry_seconds,
        call_timeout_ms = config.call_timeout_ms,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    let server_id = ServerId::new(config.server_id.clone());
    let health_state = Arc::new(HealthState::new(server_id.clone(), config.hubs.clone()));

    // Coordinator state store
    let store = build_state_store(&config).await.map_err(|e| {
        error!(error = %e, "Failed to initialize state store");
        e
    })?;

    // Actor runtime, shared by every hub frontend
    info!("Initializing actor runtime...");
    let runtime = ActorRuntime::new(store, config.runtime_settings());
    info!("Actor runtime initialized");

    let mut frontends = Vec::with_capacity(config.hubs.len());
    for hub in &config.hubs {
        let frontend = RoutingFrontend::new(
            hub.clone(),
            server_id.clone(),
            runtime.clone(),
            config.presence_heartbeat_interval(),
        )
        .map_err(|e| {
            error!(hub = %hub, error = %e, "Failed to create routing frontend");
            e
        })?;
        frontends.push(Arc::new(frontend));
    }
    info!(hubs = frontends.len(), "Routing frontends registered");

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = health_router(Arc::clone(&health_state))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = CancellationToken::new();
    let server_token = health_shutdown_token.clone();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    health_state.set_ready();
    info!("Hub Backplane running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the load balancer stops routing here
    health_state.set_draining();

    join_all(frontends.iter().map(|frontend| frontend.shutdown())).await;
    info!("Routing frontends stopped");

    health_shutdown_token.cancel();
    if let Err(e) = health_task.await {
        error!(error = %e, "Health server task failed to join");
    }

    runtime.shutdown();

    info!("Hub Backplane shutdown complete");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| observability.log_filter.clone().into());

    if observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn build_state_store(config: &Config) -> Result<Arc<dyn StateStore>, BackplaneError> {
    match (config.state_store, config.redis_url.as_ref()) {
        (StateStoreKind::Memory, _) => {
            info!("Using in-memory coordinator state");
            Ok(Arc::new(MemoryStateStore::new()))
        }
        (StateStoreKind::Redis, Some(redis_url)) => {
            info!("Connecting to Redis...");
            let store = RedisStateStore::connect(redis_url).await?;
            info!("Redis connection established");
            Ok(Arc::new(store))
        }
        (StateStoreKind::Redis, None) => Err(BackplaneError::Config(
            "REDIS_URL is required for the redis state store".to_string(),
        )),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
