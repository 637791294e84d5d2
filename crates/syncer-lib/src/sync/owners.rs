//! Owner reference resolution
//!
//! Owner kinds are dispatched through a table mapping each recognized kind
//! to its resolver and the pod field it populates. Supporting a new owner
//! kind means adding a route, not a branch.

use super::relations::{RelationResolver, Resolvers};
use crate::models::{external_id, EntityRef, PodEntity};
use crate::observability::SyncMetrics;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Owner kinds a pod can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
    Job,
    DaemonSet,
    Unknown,
}

impl From<&str> for OwnerKind {
    fn from(kind: &str) -> Self {
        match kind {
            "Deployment" => OwnerKind::Deployment,
            "ReplicaSet" => OwnerKind::ReplicaSet,
            "StatefulSet" => OwnerKind::StatefulSet,
            "Job" => OwnerKind::Job,
            "DaemonSet" => OwnerKind::DaemonSet,
            _ => OwnerKind::Unknown,
        }
    }
}

type Slot = fn(&mut PodEntity) -> &mut Option<EntityRef>;

struct OwnerRoute {
    resolver: Arc<dyn RelationResolver>,
    slot: Slot,
}

/// Attaches owner relations to a pod under construction
pub struct OwnerResolver {
    routes: HashMap<OwnerKind, OwnerRoute>,
}

impl OwnerResolver {
    pub fn new(resolvers: &Resolvers) -> Self {
        let mut resolver = Self {
            routes: HashMap::new(),
        };
        resolver.route(OwnerKind::Deployment, resolvers.deployment.clone(), |p| {
            &mut p.deployment
        });
        resolver.route(OwnerKind::ReplicaSet, resolvers.replica_set.clone(), |p| {
            &mut p.replicaset
        });
        resolver.route(OwnerKind::StatefulSet, resolvers.stateful_set.clone(), |p| {
            &mut p.statefulset
        });
        resolver.route(OwnerKind::Job, resolvers.job.clone(), |p| &mut p.job);
        resolver.route(OwnerKind::DaemonSet, resolvers.daemon_set.clone(), |p| {
            &mut p.daemonset
        });
        resolver
    }

    fn route(&mut self, kind: OwnerKind, resolver: Arc<dyn RelationResolver>, slot: Slot) {
        self.routes.insert(kind, OwnerRoute { resolver, slot });
    }

    /// Resolve every owner reference and attach the recognized ones to `pod`
    ///
    /// Neither unknown kinds nor failed resolutions fail the build.
    pub async fn resolve(&self, namespace: &str, owners: &[OwnerReference], pod: &mut PodEntity) {
        for owner in owners {
            let Some(route) = self.routes.get(&OwnerKind::from(owner.kind.as_str())) else {
                error!(
                    pod = %pod.xid,
                    owner_kind = %owner.kind,
                    owner_name = %owner.name,
                    "Unknown owner type for pod"
                );
                continue;
            };

            let xid = external_id(namespace, &owner.name);
            match route.resolver.create_or_get(&xid).await {
                Ok(uid) => *(route.slot)(pod) = Some(EntityRef::new(uid, xid)),
                Err(e) => {
                    warn!(
                        pod = %pod.xid,
                        owner_kind = %owner.kind,
                        owner = %xid,
                        error = %e,
                        "Could not resolve pod owner"
                    );
                    SyncMetrics::new().inc_unresolved_relations();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraphStore;
    use crate::sync::KeyedLocks;

    fn owner(kind: &str, name: &str) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("uid-{}", name),
            controller: Some(true),
            block_owner_deletion: None,
        }
    }

    #[test]
    fn test_owner_kind_parsing() {
        assert_eq!(OwnerKind::from("ReplicaSet"), OwnerKind::ReplicaSet);
        assert_eq!(OwnerKind::from("DaemonSet"), OwnerKind::DaemonSet);
        assert_eq!(OwnerKind::from("replicaset"), OwnerKind::Unknown);
        assert_eq!(OwnerKind::from("Widget"), OwnerKind::Unknown);
    }

    #[tokio::test]
    async fn test_only_recognized_owner_kinds_are_attached() {
        let store = Arc::new(MemoryGraphStore::new());
        let resolvers = Resolvers::backed_by(store.clone(), KeyedLocks::new());
        let owners = OwnerResolver::new(&resolvers);

        let mut pod = PodEntity::unpersisted("ns:p1");
        owners
            .resolve(
                "ns",
                &[owner("ReplicaSet", "rs1"), owner("Widget", "x")],
                &mut pod,
            )
            .await;

        assert_eq!(pod.replicaset.as_ref().map(|r| r.xid.as_str()), Some("ns:rs1"));
        assert!(pod.deployment.is_none());
        assert!(pod.statefulset.is_none());
        assert!(pod.daemonset.is_none());
        assert!(pod.job.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_multiple_owner_kinds_are_independent() {
        let store = Arc::new(MemoryGraphStore::new());
        let resolvers = Resolvers::backed_by(store.clone(), KeyedLocks::new());
        let owners = OwnerResolver::new(&resolvers);

        let mut pod = PodEntity::unpersisted("batch:run-1");
        owners
            .resolve(
                "batch",
                &[owner("Job", "nightly"), owner("StatefulSet", "db")],
                &mut pod,
            )
            .await;

        assert_eq!(pod.job.as_ref().map(|r| r.xid.as_str()), Some("batch:nightly"));
        assert_eq!(pod.statefulset.as_ref().map(|r| r.xid.as_str()), Some("batch:db"));
    }

    #[tokio::test]
    async fn test_failed_owner_resolution_leaves_slot_empty() {
        let store = Arc::new(MemoryGraphStore::new());
        store.set_fail_mutations(true);
        let resolvers = Resolvers::backed_by(store.clone(), KeyedLocks::new());
        let owners = OwnerResolver::new(&resolvers);

        let mut pod = PodEntity::unpersisted("ns:p1");
        owners
            .resolve("ns", &[owner("Deployment", "web")], &mut pod)
            .await;

        assert!(pod.deployment.is_none());
    }
}
