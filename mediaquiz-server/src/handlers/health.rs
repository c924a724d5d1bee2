//! Health check handlers
//!
//! Provides health and readiness endpoints for monitoring and orchestration.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::handlers::AppState;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status: "healthy" or "degraded"
    #[schema(example = "healthy")]
    pub status: &'static str,
    /// Server version from Cargo.toml
    pub version: &'static str,
    /// Whether the background worker accepts jobs
    pub worker_running: bool,
    /// Service name
    pub service: &'static str,
}

/// Service health
///
/// Reports `degraded` when the background worker has stopped; uploads can
/// still be staged but cannot be saved.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let worker_running = !state.queue.is_closed();

    let status = if worker_running {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        worker_running,
        service: "mediaquiz-server",
    })
}

/// Readiness response for Kubernetes
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    pub ready: bool,
    /// Optional message explaining status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// Readiness probe
///
/// Returns 503 once the background worker is gone.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready to accept traffic", body = ReadyResponse),
        (status = 503, description = "Background worker stopped", body = ReadyResponse)
    )
)]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    if state.queue.is_closed() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some("background worker stopped"),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            message: None,
        }),
    )
}
