//! Pod lifecycle orchestration
//!
//! One `store()` call per observed pod. The pod's identity is the only
//! branch point: an absent pod is created first, then the observation is
//! applied as an update or, when a deletion marker is present, as a
//! termination. Nothing is ever physically removed.

use super::builder::PodBuilder;
use super::containers::ContainerSync;
use super::identity::IdentityResolver;
use super::locks::KeyedLocks;
use super::relations::Resolvers;
use crate::error::SyncError;
use crate::graph::GraphStore;
use crate::models::{EntityRef, Kind, PodKey, Uid};
use crate::observability::SyncMetrics;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const CREATE_TOKEN: &str = "pod";

/// Phase applied to a pod by the last observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Updated,
    Terminated,
}

/// Outcome of one `store()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSync {
    pub uid: Uid,
    /// The pod was persisted for the first time by this call
    pub created: bool,
    pub phase: SyncPhase,
}

/// Drives a pod through create, update and terminate
pub struct PodSynchronizer {
    store: Arc<dyn GraphStore>,
    identity: IdentityResolver,
    builder: PodBuilder,
    locks: KeyedLocks,
    metrics: SyncMetrics,
}

impl PodSynchronizer {
    pub fn new(
        store: Arc<dyn GraphStore>,
        resolvers: Resolvers,
        containers: Arc<dyn ContainerSync>,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(store.clone()),
            builder: PodBuilder::new(resolvers, containers),
            store,
            locks,
            metrics: SyncMetrics::new(),
        }
    }

    /// Synchronize one observed pod into the graph
    ///
    /// Safe to re-invoke with the same object. Persistence errors are
    /// returned unmodified; a failed identity lookup never leads to a create.
    pub async fn store(&self, pod: &Pod) -> Result<PodSync, SyncError> {
        let key = PodKey::of(pod)?;
        let xid = key.xid();
        let started = Instant::now();

        let _guard = self.locks.lock(Kind::Pod, &xid).await;

        let existing = self
            .identity
            .resolve(&xid, Kind::Pod)
            .await
            .into_result(Kind::Pod, &xid)?;

        let (uid, created) = match existing {
            Some(uid) => (uid, false),
            None => (self.create(pod, &key).await?, true),
        };

        let phase = match pod.metadata.deletion_timestamp.as_ref() {
            Some(deleted) => {
                self.terminate(&key, &uid, deleted.0).await?;
                SyncPhase::Terminated
            }
            None => {
                self.update(pod, &key, &uid).await?;
                SyncPhase::Updated
            }
        };

        self.metrics
            .observe_sync_latency(started.elapsed().as_secs_f64());
        debug!(pod = %xid, uid = %uid, created = created, phase = ?phase, "Pod synchronized");

        Ok(PodSync {
            uid,
            created,
            phase,
        })
    }

    async fn create(&self, pod: &Pod, key: &PodKey) -> Result<Uid, SyncError> {
        let entity = self.builder.build_create(pod, key).await;
        let assigned = self.store.mutate(entity.into_mutation(CREATE_TOKEN)).await?;

        let uid = assigned
            .uid(CREATE_TOKEN)
            .cloned()
            .ok_or_else(|| SyncError::MissingAssignedId {
                xid: key.xid(),
                token: CREATE_TOKEN.to_string(),
            })?;

        info!(pod = %key.xid(), uid = %uid, "Pod persisted");
        self.metrics.inc_pods_created();
        Ok(uid)
    }

    async fn update(&self, pod: &Pod, key: &PodKey, uid: &Uid) -> Result<(), SyncError> {
        let entity = self.builder.build_update(pod, key, uid).await?;
        self.store.mutate(entity.into_mutation(CREATE_TOKEN)).await?;
        self.metrics.inc_pods_updated();
        Ok(())
    }

    async fn terminate(
        &self,
        key: &PodKey,
        uid: &Uid,
        deleted_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let entity = self.builder.build_terminate(key, uid, &deleted_at);
        self.store.mutate(entity.into_mutation(CREATE_TOKEN)).await?;
        info!(pod = %key.xid(), uid = %uid, "Pod marked as ended");
        self.metrics.inc_pods_terminated();

        let containers = self.known_containers(key, uid).await;
        self.builder
            .cascade_termination(key, &containers, deleted_at)
            .await;
        Ok(())
    }

    /// Containers the pod currently holds in the graph
    async fn known_containers(&self, key: &PodKey, uid: &Uid) -> Vec<EntityRef> {
        match self.store.node(uid).await {
            Ok(Some(node)) => node
                .edges("containers")
                .iter()
                .map(|e| EntityRef::new(e.uid.clone(), e.xid.as_str()))
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(
                    pod = %key.xid(),
                    uid = %uid,
                    error = %e,
                    "Could not read containers of deleted pod"
                );
                Vec::new()
            }
        }
    }
}
