//! Graph synchronization library for Kubernetes workloads
//!
//! This crate provides the core functionality for:
//! - Pod lifecycle synchronization into a relationship graph
//! - Relation resolution (nodes, namespaces, owners, volume claims, labels)
//! - Weighted pod-to-pod interaction edges
//! - Event dispatch and replay
//! - Health checks and observability

pub mod error;
pub mod graph;
pub mod health;
pub mod models;
pub mod observability;
pub mod sync;
pub mod worker;

pub use error::{StoreError, SyncError};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, SyncMetrics};
pub use sync::SyncEngine;
pub use worker::{read_event_log, SyncEvent, SyncWorker, WorkerConfig, WorkerStats};
