//! Create-or-get resolvers for entities related to a pod
//!
//! Each related kind (node, namespace, owners, volume claims, labels) is
//! reached through the same contract: given an external id, return the
//! internal id of the entity, creating a minimal node when absent.

use super::identity::IdentityResolver;
use super::locks::KeyedLocks;
use crate::error::{StoreError, SyncError};
use crate::graph::{GraphStore, Mutation};
use crate::models::{Kind, Uid};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Attribute holding a volume claim's requested capacity
pub const STORAGE_CAPACITY_ATTR: &str = "storageCapacity";

const CREATE_TOKEN: &str = "relation";

/// Create-or-get contract for one related kind
#[async_trait]
pub trait RelationResolver: Send + Sync {
    /// Kind of the entities this resolver returns
    fn kind(&self) -> Kind;

    /// Internal id for `xid`, creating the entity if it does not exist
    async fn create_or_get(&self, xid: &str) -> Result<Uid, SyncError>;
}

/// Volume claims additionally expose their storage capacity
#[async_trait]
pub trait VolumeClaimResolver: RelationResolver {
    async fn storage_capacity(&self, uid: &Uid) -> Result<f64, SyncError>;
}

/// Resolver that creates minimal nodes directly in the graph store
pub struct GraphRelationResolver {
    kind: Kind,
    store: Arc<dyn GraphStore>,
    identity: IdentityResolver,
    locks: KeyedLocks,
}

impl GraphRelationResolver {
    pub fn new(kind: Kind, store: Arc<dyn GraphStore>, locks: KeyedLocks) -> Self {
        Self {
            kind,
            identity: IdentityResolver::new(store.clone()),
            store,
            locks,
        }
    }
}

#[async_trait]
impl RelationResolver for GraphRelationResolver {
    fn kind(&self) -> Kind {
        self.kind
    }

    async fn create_or_get(&self, xid: &str) -> Result<Uid, SyncError> {
        let _guard = self.locks.lock(self.kind, xid).await;

        let existing = self
            .identity
            .resolve(xid, self.kind)
            .await
            .into_result(self.kind, xid)?;
        if let Some(uid) = existing {
            return Ok(uid);
        }

        let mutation = Mutation::create(CREATE_TOKEN, self.kind, xid)
            .attr("name", format!("{}-{}", self.kind.type_tag(), xid))
            .attr("type", self.kind.type_tag());

        match self.store.mutate(mutation).await {
            Ok(assigned) => {
                let uid = assigned
                    .uid(CREATE_TOKEN)
                    .cloned()
                    .ok_or_else(|| SyncError::MissingAssignedId {
                        xid: xid.to_string(),
                        token: CREATE_TOKEN.to_string(),
                    })?;
                info!(kind = %self.kind, xid = %xid, uid = %uid, "Related entity persisted");
                Ok(uid)
            }
            // Created through a path that does not share our locks
            Err(StoreError::Conflict { uid, .. }) => {
                debug!(kind = %self.kind, xid = %xid, "Entity created concurrently, reusing it");
                Ok(uid)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl VolumeClaimResolver for GraphRelationResolver {
    async fn storage_capacity(&self, uid: &Uid) -> Result<f64, SyncError> {
        let node = self
            .store
            .node(uid)
            .await?
            .ok_or_else(|| SyncError::NotYetPersisted {
                kind: self.kind,
                xid: uid.to_string(),
            })?;

        Ok(node.attr_f64(STORAGE_CAPACITY_ATTR).unwrap_or(0.0))
    }
}

/// The full set of relation collaborators a pod build needs
#[derive(Clone)]
pub struct Resolvers {
    pub node: Arc<dyn RelationResolver>,
    pub namespace: Arc<dyn RelationResolver>,
    pub deployment: Arc<dyn RelationResolver>,
    pub replica_set: Arc<dyn RelationResolver>,
    pub stateful_set: Arc<dyn RelationResolver>,
    pub daemon_set: Arc<dyn RelationResolver>,
    pub job: Arc<dyn RelationResolver>,
    pub volume_claim: Arc<dyn VolumeClaimResolver>,
    pub label: Arc<dyn RelationResolver>,
}

impl Resolvers {
    /// Resolvers that create missing entities directly in `store`
    pub fn backed_by(store: Arc<dyn GraphStore>, locks: KeyedLocks) -> Self {
        let resolver = |kind: Kind| -> Arc<GraphRelationResolver> {
            Arc::new(GraphRelationResolver::new(kind, store.clone(), locks.clone()))
        };

        Self {
            node: resolver(Kind::Node),
            namespace: resolver(Kind::Namespace),
            deployment: resolver(Kind::Deployment),
            replica_set: resolver(Kind::ReplicaSet),
            stateful_set: resolver(Kind::StatefulSet),
            daemon_set: resolver(Kind::DaemonSet),
            job: resolver(Kind::Job),
            volume_claim: resolver(Kind::PersistentVolumeClaim),
            label: resolver(Kind::Label),
        }
    }
}
