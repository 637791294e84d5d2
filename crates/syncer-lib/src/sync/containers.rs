//! Container children of a pod
//!
//! Container entities are synchronized on every pod update and carry the
//! requests/limits that get rolled up into the pod.

use super::locks::KeyedLocks;
use crate::error::{StoreError, SyncError};
use crate::graph::{GraphStore, Mutation};
use crate::models::{format_timestamp, EntityRef, Kind, PodKey, ResourceMetrics, Uid};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const CREATE_TOKEN: &str = "container";

/// A persisted container together with its resource metrics
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    pub entity: EntityRef,
    pub metrics: ResourceMetrics,
}

/// Synchronizes the containers of a pod
#[async_trait]
pub trait ContainerSync: Send + Sync {
    /// Persist the pod's current containers and return them with their metrics
    async fn store_and_retrieve(
        &self,
        pod: &Pod,
        pod_uid: &Uid,
        namespace_uid: Option<&Uid>,
    ) -> Result<Vec<ContainerRecord>, SyncError>;

    /// Mark containers of a terminated pod as ended
    async fn terminate(
        &self,
        containers: &[EntityRef],
        end_time: DateTime<Utc>,
    ) -> Result<(), SyncError>;
}

/// Container sync reading requests and limits from the pod spec
pub struct SpecContainerSync {
    store: Arc<dyn GraphStore>,
    locks: KeyedLocks,
}

impl SpecContainerSync {
    pub fn new(store: Arc<dyn GraphStore>, locks: KeyedLocks) -> Self {
        Self { store, locks }
    }

    async fn create_or_get(&self, xid: &str, name: &str, pod: &Pod) -> Result<Uid, SyncError> {
        let _guard = self.locks.lock(Kind::Container, xid).await;

        let existing = self.store.lookup(xid, Kind::Container).await.map_err(|source| {
            SyncError::LookupFailed {
                kind: Kind::Container,
                xid: xid.to_string(),
                source,
            }
        })?;
        if let Some(uid) = existing {
            return Ok(uid);
        }

        let mut mutation = Mutation::create(CREATE_TOKEN, Kind::Container, xid)
            .attr("name", name)
            .attr("type", Kind::Container.type_tag());
        if let Some(created) = pod.metadata.creation_timestamp.as_ref() {
            mutation = mutation.attr("startTime", format_timestamp(&created.0));
        }

        match self.store.mutate(mutation).await {
            Ok(assigned) => assigned.uid(CREATE_TOKEN).cloned().ok_or_else(|| {
                SyncError::MissingAssignedId {
                    xid: xid.to_string(),
                    token: CREATE_TOKEN.to_string(),
                }
            }),
            Err(StoreError::Conflict { uid, .. }) => Ok(uid),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ContainerSync for SpecContainerSync {
    async fn store_and_retrieve(
        &self,
        pod: &Pod,
        pod_uid: &Uid,
        namespace_uid: Option<&Uid>,
    ) -> Result<Vec<ContainerRecord>, SyncError> {
        let key = PodKey::of(pod)?;
        let pod_ref = EntityRef::new(pod_uid.clone(), key.xid());
        let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or(&[]);

        let mut records = Vec::with_capacity(containers.len());
        for container in containers {
            let xid = format!("{}:{}", key.xid(), container.name);
            let uid = self.create_or_get(&xid, &container.name, pod).await?;
            let metrics = container_metrics(container);

            let mut mutation = Mutation::update(uid.clone(), Kind::Container, xid.as_str())
                .attr("cpuRequest", metrics.cpu_request)
                .attr("cpuLimit", metrics.cpu_limit)
                .attr("memoryRequest", metrics.memory_request)
                .attr("memoryLimit", metrics.memory_limit)
                .relation("pod", &pod_ref);
            if let Some(ns) = namespace_uid {
                let namespace = EntityRef::new(ns.clone(), key.namespace.as_str());
                mutation = mutation.relation("namespace", &namespace);
            }
            self.store.mutate(mutation).await?;

            records.push(ContainerRecord {
                entity: EntityRef::new(uid, xid),
                metrics,
            });
        }

        debug!(pod = %key.xid(), containers = records.len(), "Containers synchronized");
        Ok(records)
    }

    async fn terminate(
        &self,
        containers: &[EntityRef],
        end_time: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let end_time = format_timestamp(&end_time);
        for container in containers {
            let mutation =
                Mutation::update(container.uid.clone(), Kind::Container, container.xid.as_str())
                    .attr("endTime", end_time.as_str());
            self.store.mutate(mutation).await?;
        }
        Ok(())
    }
}

/// Requests and limits of one container; CPU in cores, memory in bytes
pub fn container_metrics(container: &Container) -> ResourceMetrics {
    let Some(resources) = container.resources.as_ref() else {
        return ResourceMetrics::default();
    };

    let read = |values: &Option<BTreeMap<String, Quantity>>, resource: &str| -> f64 {
        values
            .as_ref()
            .and_then(|v| v.get(resource))
            .map(|q| {
                parse_quantity(&q.0).unwrap_or_else(|| {
                    warn!(
                        container = %container.name,
                        resource = %resource,
                        quantity = %q.0,
                        "Unparseable resource quantity"
                    );
                    0.0
                })
            })
            .unwrap_or(0.0)
    };

    ResourceMetrics {
        cpu_request: read(&resources.requests, "cpu"),
        cpu_limit: read(&resources.limits, "cpu"),
        memory_request: read(&resources.requests, "memory"),
        memory_limit: read(&resources.limits, "memory"),
    }
}

/// Parse a Kubernetes quantity (`100m`, `1.5`, `256Mi`, `1G`, `1e3`)
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }

    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    for (suffix, multiplier) in SUFFIXES {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * multiplier);
        }
    }

    // Plain numbers, including decimal exponents such as 1e3
    quantity.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraphStore;
    use k8s_openapi::api::core::v1::{PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn container(name: &str, cpu: &str, memory: &str) -> Container {
        let quantities = |cpu: &str, memory: &str| {
            BTreeMap::from([
                ("cpu".to_string(), Quantity(cpu.to_string())),
                ("memory".to_string(), Quantity(memory.to_string())),
            ])
        };
        Container {
            name: name.to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(quantities(cpu, memory)),
                limits: Some(quantities(cpu, memory)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("100m"), Some(0.1));
        assert_eq!(parse_quantity("2"), Some(2.0));
        assert_eq!(parse_quantity("1.5"), Some(1.5));
        assert_eq!(parse_quantity("256Mi"), Some(268_435_456.0));
        assert_eq!(parse_quantity("1G"), Some(1e9));
        assert_eq!(parse_quantity("1e3"), Some(1000.0));
        assert_eq!(parse_quantity(""), None);
        assert_eq!(parse_quantity("lots"), None);
    }

    #[test]
    fn test_container_without_resources() {
        let c = Container {
            name: "sidecar".to_string(),
            ..Default::default()
        };
        assert_eq!(container_metrics(&c), ResourceMetrics::default());
    }

    #[tokio::test]
    async fn test_store_and_retrieve_is_idempotent() {
        let store = Arc::new(MemoryGraphStore::new());
        let sync = SpecContainerSync::new(store.clone(), KeyedLocks::new());
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("shop".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![
                    container("app", "500m", "1Gi"),
                    container("proxy", "100m", "64Mi"),
                ],
                ..Default::default()
            }),
            ..Default::default()
        };
        let pod_uid = Uid::new("0xabc");

        let first = sync.store_and_retrieve(&pod, &pod_uid, None).await.unwrap();
        let second = sync.store_and_retrieve(&pod, &pod_uid, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].entity.xid, "shop:web-0:app");
        assert_eq!(first[0].metrics.cpu_request, 0.5);
        assert_eq!(store.nodes_of_kind(Kind::Container).await.len(), 2);

        let node = store.node(&first[1].entity.uid).await.unwrap().unwrap();
        assert_eq!(node.relation("pod").map(|e| e.uid.clone()), Some(pod_uid));
        assert_eq!(node.attr_f64("memoryLimit"), Some(67_108_864.0));
    }

    #[tokio::test]
    async fn test_terminate_sets_end_time() {
        let store = Arc::new(MemoryGraphStore::new());
        let sync = SpecContainerSync::new(store.clone(), KeyedLocks::new());
        let uid = store
            .mutate(Mutation::create("c", Kind::Container, "ns:p:app"))
            .await
            .unwrap()
            .uid("c")
            .cloned()
            .unwrap();
        let end = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        sync.terminate(&[EntityRef::new(uid.clone(), "ns:p:app")], end)
            .await
            .unwrap();

        let node = store.node(&uid).await.unwrap().unwrap();
        assert_eq!(node.attr_str("endTime"), Some("2024-05-01T12:00:00Z"));
    }
}
