//! Core data models for the graph syncer

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::AddAssign;

use crate::error::SyncError;

/// Namespace assumed for objects delivered without one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Internal id assigned by the graph store on first persistence
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity kinds stored in the graph
///
/// External ids are only unique within a kind, so every lookup carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Pod,
    Node,
    Namespace,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    PersistentVolumeClaim,
    Container,
    Label,
}

impl Kind {
    /// Discriminator predicate marking entities of this kind
    pub fn discriminator(&self) -> &'static str {
        match self {
            Kind::Pod => "isPod",
            Kind::Node => "isNode",
            Kind::Namespace => "isNamespace",
            Kind::Deployment => "isDeployment",
            Kind::ReplicaSet => "isReplicaset",
            Kind::StatefulSet => "isStatefulset",
            Kind::DaemonSet => "isDaemonset",
            Kind::Job => "isJob",
            Kind::PersistentVolumeClaim => "isPersistentVolumeClaim",
            Kind::Container => "isContainer",
            Kind::Label => "isLabel",
        }
    }

    /// Short type tag used in display names and the `type` attribute
    pub fn type_tag(&self) -> &'static str {
        match self {
            Kind::Pod => "pod",
            Kind::Node => "node",
            Kind::Namespace => "namespace",
            Kind::Deployment => "deployment",
            Kind::ReplicaSet => "replicaset",
            Kind::StatefulSet => "statefulset",
            Kind::DaemonSet => "daemonset",
            Kind::Job => "job",
            Kind::PersistentVolumeClaim => "pvc",
            Kind::Container => "container",
            Kind::Label => "label",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

/// Build the `namespace:name` external id used for namespaced objects
pub fn external_id(namespace: &str, name: &str) -> String {
    format!("{}:{}", namespace, name)
}

/// Format a timestamp the way entity documents store it (RFC 3339, UTC)
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Identity of an observed pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    /// Read the identity of an observed pod, rejecting objects without a name
    pub fn of(pod: &Pod) -> Result<Self, SyncError> {
        let name = pod
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SyncError::InvalidObject("pod has no name".to_string()))?;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Ok(Self { namespace, name })
    }

    pub fn xid(&self) -> String {
        external_id(&self.namespace, &self.name)
    }
}

/// Reference to an already persisted entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub uid: Uid,
    pub xid: String,
}

impl EntityRef {
    pub fn new(uid: Uid, xid: impl Into<String>) -> Self {
        Self {
            uid,
            xid: xid.into(),
        }
    }
}

/// Interaction edge target with its observed traffic weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedRef {
    pub target: EntityRef,
    pub count: f64,
}

/// CPU and memory requests/limits of a container or a rolled-up pod
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_request: f64,
    pub cpu_limit: f64,
    pub memory_request: f64,
    pub memory_limit: f64,
}

impl ResourceMetrics {
    pub fn new(cpu_request: f64, cpu_limit: f64, memory_request: f64, memory_limit: f64) -> Self {
        Self {
            cpu_request,
            cpu_limit,
            memory_request,
            memory_limit,
        }
    }
}

impl AddAssign<&ResourceMetrics> for ResourceMetrics {
    fn add_assign(&mut self, other: &ResourceMetrics) {
        self.cpu_request += other.cpu_request;
        self.cpu_limit += other.cpu_limit;
        self.memory_request += other.memory_request;
        self.memory_limit += other.memory_limit;
    }
}

impl<'a> Sum<&'a ResourceMetrics> for ResourceMetrics {
    fn sum<I: Iterator<Item = &'a ResourceMetrics>>(iter: I) -> Self {
        iter.fold(ResourceMetrics::default(), |mut acc, m| {
            acc += m;
            acc
        })
    }
}

/// Pod entity as written to the graph
///
/// Unset fields are left untouched by an update, so each lifecycle phase
/// only fills in what it owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodEntity {
    pub uid: Option<Uid>,
    pub xid: String,
    pub name: Option<String>,
    pub type_tag: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub containers: Option<Vec<EntityRef>>,
    pub interactions: Vec<WeightedRef>,
    pub node: Option<EntityRef>,
    pub namespace: Option<EntityRef>,
    pub deployment: Option<EntityRef>,
    pub replicaset: Option<EntityRef>,
    pub statefulset: Option<EntityRef>,
    pub daemonset: Option<EntityRef>,
    pub job: Option<EntityRef>,
    pub pvcs: Option<Vec<EntityRef>>,
    pub storage_request: Option<f64>,
    pub metrics: Option<ResourceMetrics>,
    pub labels: Option<Vec<EntityRef>>,
}

impl PodEntity {
    /// Entity keyed by external id only, before it has been persisted
    pub fn unpersisted(xid: impl Into<String>) -> Self {
        Self {
            xid: xid.into(),
            ..Default::default()
        }
    }

    /// Entity keyed by an existing internal id
    pub fn persisted(uid: Uid, xid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid),
            xid: xid.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_pod_key_defaults_namespace() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let key = PodKey::of(&pod).unwrap();
        assert_eq!(key.xid(), "default:web-0");
    }

    #[test]
    fn test_pod_key_requires_name() {
        let pod = Pod::default();
        assert!(matches!(PodKey::of(&pod), Err(SyncError::InvalidObject(_))));
    }

    #[test]
    fn test_discriminators_are_distinct_per_kind() {
        assert_eq!(Kind::Pod.discriminator(), "isPod");
        assert_ne!(
            Kind::ReplicaSet.discriminator(),
            Kind::StatefulSet.discriminator()
        );
    }

    #[test]
    fn test_timestamp_format() {
        let ts = DateTime::parse_from_rfc3339("2018-03-01T10:00:00+02:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&ts), "2018-03-01T08:00:00Z");
    }
}
