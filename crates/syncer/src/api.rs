//! HTTP API for health checks, Prometheus metrics and event ingestion

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use syncer_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::SyncMetrics,
    SyncEvent,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: SyncMetrics,
    pub events: mpsc::Sender<SyncEvent>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: SyncMetrics,
        events: mpsc::Sender<SyncEvent>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            events,
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Queue one observed object or interaction batch for synchronization
///
/// Returns 202 once queued; the outcome is only visible in logs and metrics.
async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(event): Json<SyncEvent>,
) -> impl IntoResponse {
    let subject = event.subject();
    match state.events.try_send(event) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "queued": subject }))),
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(subject = %subject, "Event channel full, rejecting event");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "event queue full" })),
            )
        }
        Err(mpsc::error::TrySendError::Closed(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "syncer shutting down" })),
        ),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/events", post(ingest))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
