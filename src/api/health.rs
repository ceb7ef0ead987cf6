//! Health, readiness and identity endpoints

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Individual readiness checks
#[derive(Serialize)]
pub struct ReadinessChecks {
    pub registry: CheckResult,
    pub sweeper: CheckResult,
}

/// Result of a single health check
#[derive(Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail",
            message: Some(message.into()),
        }
    }
}

/// Coordinator identity response
#[derive(Serialize)]
pub struct IdentityResponse {
    pub identity: String,
}

/// Liveness probe - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness probe - is the service ready to accept traffic?
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let registry = check_registry(&state).await;
    let sweeper = check_sweeper(&state);

    let all_ok = registry.status == "ok" && sweeper.status == "ok";
    let (status, http_status) = if all_ok {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        http_status,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks { registry, sweeper },
        }),
    )
}

/// Check that the registry lock can be taken promptly
async fn check_registry(state: &ApiState) -> CheckResult {
    match tokio::time::timeout(Duration::from_secs(1), state.registry.lock()).await {
        Ok(_) => CheckResult::ok(),
        Err(_) => CheckResult::fail("registry lock not acquired within 1s"),
    }
}

fn check_sweeper(state: &ApiState) -> CheckResult {
    if state.sweeper_running.load(Ordering::SeqCst) {
        CheckResult::ok()
    } else {
        CheckResult::fail("liveness sweeper not running")
    }
}

async fn identity(State(state): State<Arc<ApiState>>) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        identity: state.identity.clone(),
    })
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build readiness router (needs state for checks)
pub fn ready_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ready", get(ready))
        .route("/api/identity", get(identity))
        .with_state(state)
}
