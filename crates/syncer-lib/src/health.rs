//! Health tracking for the graph syncer
//!
//! Three components are tracked: the graph store and the two write paths
//! (pod sync and interactions). Write-path failures degrade their own
//! component. Store failures degrade `graph_store` and, once
//! `STORE_FAILURE_THRESHOLD` of them happen in a row, mark it unhealthy,
//! which also takes the syncer out of readiness. Any successful write
//! clears the streak.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive store failures after which the graph store is unhealthy
pub const STORE_FAILURE_THRESHOLD: u32 = 3;

/// Tracked syncer components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    GraphStore,
    PodSync,
    Interactions,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::GraphStore,
        Component::PodSync,
        Component::Interactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::GraphStore => "graph_store",
            Component::PodSync => "pod_sync",
            Component::Interactions => "interactions",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Some writes failed; the syncer keeps going
    Degraded,
    /// The graph store keeps rejecting writes
    Unhealthy,
}

/// Reported health of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<Component, ComponentHealth>>>,
    store_failure_streak: Arc<AtomicU32>,
    ready: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every component as healthy
    pub async fn register_all(&self) {
        let mut components = self.components.write().await;
        for component in Component::ALL {
            components.insert(
                component,
                ComponentHealth::with_status(ComponentStatus::Healthy, None),
            );
        }
    }

    async fn set(
        &self,
        component: Component,
        status: ComponentStatus,
        message: Option<String>,
    ) {
        self.components
            .write()
            .await
            .insert(component, ComponentHealth::with_status(status, message));
    }

    pub async fn set_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    /// A write reached the store; clears any failure streak
    pub async fn record_store_success(&self) {
        if self.store_failure_streak.load(Ordering::SeqCst) == 0 {
            return;
        }
        let mut components = self.components.write().await;
        if self.store_failure_streak.swap(0, Ordering::SeqCst) > 0 {
            components.insert(
                Component::GraphStore,
                ComponentHealth::with_status(ComponentStatus::Healthy, None),
            );
        }
    }

    /// The store rejected a write or a lookup
    pub async fn record_store_failure(&self, message: impl Into<String>) {
        // Streak and status are updated under the same lock
        let mut components = self.components.write().await;
        let streak = self.store_failure_streak.fetch_add(1, Ordering::SeqCst) + 1;
        let status = if streak >= STORE_FAILURE_THRESHOLD {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        let message = format!("{} ({} consecutive failures)", message.into(), streak);
        components.insert(
            Component::GraphStore,
            ComponentHealth::with_status(status, Some(message)),
        );
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await;

        let status = components
            .values()
            .map(|h| h.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            });

        HealthResponse {
            status,
            components: components
                .iter()
                .map(|(c, h)| (c.as_str().to_string(), h.clone()))
                .collect(),
        }
    }

    /// Ready once initialized (replay done) and while the store accepts writes
    pub async fn readiness(&self) -> ReadinessResponse {
        let not_ready = |reason: &str| ReadinessResponse {
            ready: false,
            reason: Some(reason.to_string()),
        };

        if !self.ready.load(Ordering::SeqCst) {
            return not_ready("Syncer not yet initialized");
        }

        let store_status = self
            .components
            .read()
            .await
            .get(&Component::GraphStore)
            .map(|h| h.status);
        if store_status == Some(ComponentStatus::Unhealthy) {
            return not_ready("Graph store unhealthy");
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
