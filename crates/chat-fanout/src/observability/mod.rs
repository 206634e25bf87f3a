//! Observability for the fanout core.
//!
//! - [`health`] - liveness and readiness endpoints
//! - [`metrics`] - Prometheus metric definitions

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
