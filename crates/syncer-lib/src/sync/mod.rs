//! Resource synchronization engine
//!
//! This module provides:
//! - Identity resolution and keyed serialization per external id
//! - Create-or-get resolvers for node, namespace, owner, claim and label entities
//! - Pod lifecycle orchestration (create, update, terminate)
//! - Container sync with metric rollup into the pod
//! - Weighted pod-to-pod interaction edges

mod builder;
mod containers;
mod identity;
mod interactions;
mod lifecycle;
mod locks;
mod owners;
mod relations;
mod rollup;


pub use builder::PodBuilder;
pub use containers::{
    container_metrics, parse_quantity, ContainerRecord, ContainerSync, SpecContainerSync,
};
pub use identity::{IdentityResolver, Resolution};
pub use interactions::InteractionRecorder;
pub use lifecycle::{PodSync, PodSynchronizer, SyncPhase};
pub use locks::{KeyGuard, KeyedLocks};
pub use owners::{OwnerKind, OwnerResolver};
pub use relations::{
    GraphRelationResolver, RelationResolver, Resolvers, VolumeClaimResolver,
    STORAGE_CAPACITY_ATTR,
};
pub use rollup::aggregate;

use crate::error::SyncError;
use crate::graph::GraphStore;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;

/// Entry point of the engine: pod lifecycle plus interaction recording,
/// sharing one set of keyed locks
pub struct SyncEngine {
    pods: PodSynchronizer,
    interactions: InteractionRecorder,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        resolvers: Resolvers,
        containers: Arc<dyn ContainerSync>,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            pods: PodSynchronizer::new(store.clone(), resolvers, containers, locks.clone()),
            interactions: InteractionRecorder::new(store, locks),
        }
    }

    /// Engine with graph-backed resolvers and container metrics read from pod resources
    pub fn backed_by(store: Arc<dyn GraphStore>) -> Self {
        let locks = KeyedLocks::new();
        let resolvers = Resolvers::backed_by(store.clone(), locks.clone());
        let containers = Arc::new(SpecContainerSync::new(store.clone(), locks.clone()));
        Self::new(store, resolvers, containers, locks)
    }

    pub async fn store(&self, pod: &Pod) -> Result<PodSync, SyncError> {
        self.pods.store(pod).await
    }

    pub async fn store_interactions(
        &self,
        source: &str,
        destinations: &[String],
        counts: &[f64],
    ) -> Result<usize, SyncError> {
        self.interactions
            .store_interactions(source, destinations, counts)
            .await
    }
}
