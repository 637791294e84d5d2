//! Pod entity construction per lifecycle phase
//!
//! - create: identity, start time, node, namespace, volume claims, owners
//! - update: namespace, containers and rolled-up metrics, labels
//! - terminate: end time only

use super::containers::ContainerSync;
use super::owners::OwnerResolver;
use super::relations::Resolvers;
use super::rollup;
use crate::error::SyncError;
use crate::graph::{Edge, EdgeWrite, Mutation};
use crate::models::{
    external_id, format_timestamp, EntityRef, Kind, PodEntity, PodKey, Uid,
};
use crate::observability::SyncMetrics;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

impl PodEntity {
    /// Turn the entity into a store mutation
    ///
    /// Entities without an internal id become creates reporting their id
    /// under `create_token`.
    pub fn into_mutation(self, create_token: &str) -> Mutation {
        let mut mutation = match self.uid {
            Some(uid) => Mutation::update(uid, Kind::Pod, self.xid),
            None => Mutation::create(create_token, Kind::Pod, self.xid),
        };

        if let Some(name) = self.name {
            mutation = mutation.attr("name", name);
        }
        if let Some(type_tag) = self.type_tag {
            mutation = mutation.attr("type", type_tag);
        }
        if let Some(start) = self.start_time {
            mutation = mutation.attr("startTime", start);
        }
        if let Some(end) = self.end_time {
            mutation = mutation.attr("endTime", end);
        }
        if let Some(storage) = self.storage_request {
            mutation = mutation.attr("storageRequest", storage);
        }
        if let Some(metrics) = self.metrics {
            mutation = mutation
                .attr("cpuRequest", metrics.cpu_request)
                .attr("cpuLimit", metrics.cpu_limit)
                .attr("memoryRequest", metrics.memory_request)
                .attr("memoryLimit", metrics.memory_limit);
        }

        let relations = [
            ("node", self.node),
            ("namespace", self.namespace),
            ("deployment", self.deployment),
            ("replicaset", self.replicaset),
            ("statefulset", self.statefulset),
            ("daemonset", self.daemonset),
            ("job", self.job),
        ];
        for (predicate, target) in relations {
            if let Some(target) = target {
                mutation = mutation.relation(predicate, &target);
            }
        }

        let lists = [
            ("containers", self.containers),
            ("pvc", self.pvcs),
            ("label", self.labels),
        ];
        for (predicate, targets) in lists {
            if let Some(targets) = targets {
                let edges = targets.iter().map(Edge::to).collect();
                mutation = mutation.edges(predicate, EdgeWrite::Replace(edges));
            }
        }

        if !self.interactions.is_empty() {
            let edges = self
                .interactions
                .iter()
                .map(|w| Edge::weighted(&w.target, w.count))
                .collect();
            mutation = mutation.edges("pod", EdgeWrite::Merge(edges));
        }

        mutation
    }
}

/// Assembles pod entities from observed pods
pub struct PodBuilder {
    resolvers: Resolvers,
    containers: Arc<dyn ContainerSync>,
    owners: OwnerResolver,
    metrics: SyncMetrics,
}

impl PodBuilder {
    pub fn new(resolvers: Resolvers, containers: Arc<dyn ContainerSync>) -> Self {
        Self {
            owners: OwnerResolver::new(&resolvers),
            resolvers,
            containers,
            metrics: SyncMetrics::new(),
        }
    }

    /// Entity for the first persistence of a pod
    pub async fn build_create(&self, pod: &Pod, key: &PodKey) -> PodEntity {
        let mut entity = PodEntity::unpersisted(key.xid());
        entity.name = Some(format!("pod-{}", key.name));
        entity.type_tag = Some(Kind::Pod.type_tag().to_string());
        entity.start_time = pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| format_timestamp(&t.0));

        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .filter(|n| !n.is_empty());
        if let Some(node_name) = node_name {
            match self.resolvers.node.create_or_get(node_name).await {
                Ok(uid) => entity.node = Some(EntityRef::new(uid, node_name)),
                Err(e) => self.unresolved(&entity.xid, Kind::Node, node_name, &e),
            }
        }

        entity.namespace = self.resolve_namespace(key).await;

        let (pvcs, storage) = self.resolve_volumes(pod, key, &entity.xid).await;
        entity.pvcs = Some(pvcs);
        entity.storage_request = Some(storage);

        let owners = pod.metadata.owner_references.as_deref().unwrap_or(&[]);
        self.owners.resolve(&key.namespace, owners, &mut entity).await;

        entity
    }

    /// Entity for a pod observed without a deletion marker
    ///
    /// Container sync failures fail the build: writing an empty container
    /// list and zeroed metrics would overwrite good data.
    pub async fn build_update(
        &self,
        pod: &Pod,
        key: &PodKey,
        uid: &Uid,
    ) -> Result<PodEntity, SyncError> {
        let mut entity = PodEntity::persisted(uid.clone(), key.xid());

        let namespace = self.resolve_namespace(key).await;
        let containers = self
            .containers
            .store_and_retrieve(pod, uid, namespace.as_ref().map(|ns| &ns.uid))
            .await?;

        entity.metrics = Some(rollup::aggregate(&containers));
        entity.containers = Some(containers.into_iter().map(|c| c.entity).collect());
        entity.labels = Some(self.resolve_labels(key, pod.metadata.labels.as_ref()).await);

        Ok(entity)
    }

    /// Minimal entity recording the end of a pod
    pub fn build_terminate(
        &self,
        key: &PodKey,
        uid: &Uid,
        deleted_at: &DateTime<Utc>,
    ) -> PodEntity {
        let mut entity = PodEntity::persisted(uid.clone(), key.xid());
        entity.end_time = Some(format_timestamp(deleted_at));
        entity
    }

    /// Best-effort termination of the pod's known containers
    pub async fn cascade_termination(
        &self,
        key: &PodKey,
        containers: &[EntityRef],
        deleted_at: DateTime<Utc>,
    ) {
        if containers.is_empty() {
            debug!(pod = %key.xid(), "No known containers to terminate");
            return;
        }

        if let Err(e) = self.containers.terminate(containers, deleted_at).await {
            warn!(
                pod = %key.xid(),
                containers = containers.len(),
                error = %e,
                "Failed to terminate containers of deleted pod"
            );
        }
    }

    async fn resolve_namespace(&self, key: &PodKey) -> Option<EntityRef> {
        match self.resolvers.namespace.create_or_get(&key.namespace).await {
            Ok(uid) => Some(EntityRef::new(uid, key.namespace.as_str())),
            Err(e) => {
                self.unresolved(&key.xid(), Kind::Namespace, &key.namespace, &e);
                None
            }
        }
    }

    /// Resolve volume claims and sum the storage of the resolved ones
    async fn resolve_volumes(
        &self,
        pod: &Pod,
        key: &PodKey,
        pod_xid: &str,
    ) -> (Vec<EntityRef>, f64) {
        let volumes = pod
            .spec
            .as_ref()
            .and_then(|s| s.volumes.as_deref())
            .unwrap_or(&[]);

        let mut claims = Vec::new();
        let mut storage = 0.0;
        for claim in volumes.iter().filter_map(|v| v.persistent_volume_claim.as_ref()) {
            let xid = external_id(&key.namespace, &claim.claim_name);
            let uid = match self.resolvers.volume_claim.create_or_get(&xid).await {
                Ok(uid) => uid,
                Err(e) => {
                    self.unresolved(pod_xid, Kind::PersistentVolumeClaim, &xid, &e);
                    continue;
                }
            };

            match self.resolvers.volume_claim.storage_capacity(&uid).await {
                Ok(capacity) => storage += capacity,
                Err(e) => warn!(
                    pod = %pod_xid,
                    pvc = %xid,
                    uid = %uid,
                    error = %e,
                    "Could not read storage capacity of volume claim"
                ),
            }
            claims.push(EntityRef::new(uid, xid));
        }

        (claims, storage)
    }

    /// Full label set of the pod; unresolvable labels are left out
    async fn resolve_labels(
        &self,
        key: &PodKey,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Vec<EntityRef> {
        let Some(labels) = labels else {
            return Vec::new();
        };
        debug!(pod = %key.xid(), labels = ?labels, "Synchronizing pod labels");

        let mut resolved = Vec::with_capacity(labels.len());
        for (name, value) in labels {
            let xid = external_id(name, value);
            match self.resolvers.label.create_or_get(&xid).await {
                Ok(uid) => resolved.push(EntityRef::new(uid, xid)),
                Err(e) => self.unresolved(&key.xid(), Kind::Label, &xid, &e),
            }
        }
        resolved
    }

    fn unresolved(&self, pod: &str, kind: Kind, xid: &str, error: &SyncError) {
        warn!(
            pod = %pod,
            kind = %kind,
            xid = %xid,
            error = %error,
            "Relation could not be resolved, leaving it out"
        );
        self.metrics.inc_unresolved_relations();
    }
}
