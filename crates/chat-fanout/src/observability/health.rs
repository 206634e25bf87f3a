//! Health endpoints.
//!
//! - `GET /health` - liveness (the process is running)
//! - `GET /ready` - readiness (the hub is subscribed to the global channel
//!   and the instance is not shutting down)
//!
//! `/metrics` is served next to these by the binary, from the Prometheus
//! exporter handle.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags shared between the binary and the router.
#[derive(Debug)]
pub struct HealthState {
    instance_id: String,
    live: AtomicBool,
    ready: AtomicBool,
}

impl HealthState {
    /// New state: live, not yet ready.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// The hub is running; accept traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Stop accepting traffic (shutdown, or the hub stopped).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Body of the readiness response.
#[derive(Debug, Serialize)]
struct ReadinessBody {
    instance_id: String,
    ready: bool,
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessBody>) {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessBody {
            instance_id: state.instance_id.clone(),
            ready,
        }),
    )
}
