//! Health endpoints for the backplane node.
//!
//! - `GET /health` - liveness (process is running)
//! - `GET /ready` - readiness (frontends registered, presence heartbeats flowing)
//!
//! `/ready` answers with a small JSON body naming the server id and the hubs
//! this node serves, so an operator can tell nodes apart behind a load
//! balancer.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use common::types::ServerId;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness of one backplane node.
#[derive(Debug)]
pub struct HealthState {
    server_id: ServerId,
    hubs: Vec<String>,
    ready: AtomicBool,
    draining: AtomicBool,
}

impl HealthState {
    /// Create a health state for a node serving `hubs` (not ready yet).
    #[must_use]
    pub fn new(server_id: ServerId, hubs: Vec<String>) -> Self {
        Self {
            server_id,
            hubs,
            ready: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        }
    }

    /// Mark the node ready once every hub frontend is registered.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the node as draining. Readiness fails from here on; liveness stays.
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// Body of `GET /ready`.
#[derive(Debug, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    pub server_id: String,
    pub hubs: Vec<String>,
}

/// Router with `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessReport>) {
    let (code, status) = if state.is_ready() {
        (StatusCode::OK, "ready")
    } else if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    };

    (
        code,
        Json(ReadinessReport {
            status,
            server_id: state.server_id.to_string(),
            hubs: state.hubs.clone(),
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn state() -> Arc<HealthState> {
        Arc::new(HealthState::new(
            ServerId::new("srv-a"),
            vec!["chat".to_string()],
        ))
    }

    async fn get_ready(state: Arc<HealthState>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .uri("/ready")
            .body(Body::empty())
            .expect("Failed to build request");
        let response = health_router(state)
            .oneshot(request)
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("Failed to build request");
        let response = health_router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_transitions() {
        let state = state();

        let (code, body) = get_ready(Arc::clone(&state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "starting");

        state.set_ready();
        let (code, body) = get_ready(Arc::clone(&state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["server_id"], "srv-a");
        assert_eq!(body["hubs"][0], "chat");

        state.set_draining();
        let (code, body) = get_ready(Arc::clone(&state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "draining");
    }
}
