//! Integration tests for the syncer API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use graph_syncer::api::{create_router, AppState};
use std::sync::Arc;
use syncer_lib::{
    health::{Component, HealthRegistry, STORE_FAILURE_THRESHOLD},
    observability::SyncMetrics,
    SyncEvent,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

async fn setup_test_app(
    capacity: usize,
) -> (Router, Arc<AppState>, mpsc::Receiver<SyncEvent>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let (tx, rx) = mpsc::channel(capacity);
    let state = Arc::new(AppState::new(health_registry, SyncMetrics::new(), tx));
    let router = create_router(state.clone());

    (router, state, rx)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_event(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _rx) = setup_test_app(8).await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["graph_store"].is_object());
    assert!(health["components"]["pod_sync"].is_object());
    assert!(health["components"]["interactions"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state, _rx) = setup_test_app(8).await;

    state
        .health_registry
        .set_degraded(Component::PodSync, "Relations left unresolved")
        .await;

    let response = app.oneshot(get("/healthz")).await.unwrap();

    // Degraded still returns 200 (operational)
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _rx) = setup_test_app(8).await;

    state.health_registry.set_ready(true);
    for _ in 0..STORE_FAILURE_THRESHOLD {
        state
            .health_registry
            .record_store_failure("Graph store unreachable")
            .await;
    }

    let response = app.clone().oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["status"], "unhealthy");

    let response = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["reason"], "Graph store unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state, _rx) = setup_test_app(8).await;

    let response = app.oneshot(get("/readyz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state, _rx) = setup_test_app(8).await;
    state.health_registry.set_ready(true);

    let response = app.oneshot(get("/readyz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state, _rx) = setup_test_app(8).await;

    state.metrics.observe_sync_latency(0.001);
    state.metrics.observe_sync_latency(0.01);
    state.metrics.inc_pods_created();
    state.metrics.inc_unresolved_relations();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("graph_syncer_pods_created_total"));
    assert!(metrics_text.contains("graph_syncer_unresolved_relations_total"));
    assert!(metrics_text.contains("graph_syncer_sync_latency_seconds_bucket"));
    assert!(metrics_text.contains("graph_syncer_sync_latency_seconds_count"));
}

#[tokio::test]
async fn test_events_are_queued() {
    let (app, _state, mut rx) = setup_test_app(8).await;

    let response = app
        .oneshot(post_event(
            r#"{"type":"pod","object":{"metadata":{"name":"web-0","namespace":"shop"}}}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["queued"], "pod shop/web-0");

    let event = rx.try_recv().unwrap();
    assert!(matches!(event, SyncEvent::Pod { .. }));
}

#[tokio::test]
async fn test_events_rejected_when_queue_full() {
    let (app, _state, _rx) = setup_test_app(1).await;
    let body =
        r#"{"type":"interaction","source":"ns:a","destinations":["ns:b"],"counts":[2.0]}"#;

    let first = app.clone().oneshot(post_event(body)).await.unwrap();
    let second = app.oneshot(post_event(body)).await.unwrap();

    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_malformed_event_is_rejected() {
    let (app, _state, mut rx) = setup_test_app(8).await;

    let response = app
        .oneshot(post_event(r#"{"type":"deployment"}"#))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert!(rx.try_recv().is_err());
}
