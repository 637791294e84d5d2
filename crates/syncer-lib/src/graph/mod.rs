//! Graph store abstraction
//!
//! The synchronization engine only needs three primitives from the
//! persistent graph:
//! - `mutate` applies a create or an update of one node and its edges
//! - `lookup` resolves an (external id, kind) pair to an internal id
//! - `node` reads a node back by internal id

mod memory;

pub use memory::MemoryGraphStore;

use crate::error::StoreError;
use crate::models::{EntityRef, Kind, Uid};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Whether a mutation introduces a new node or changes an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
    Create,
    Update,
}

/// Node addressed by a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationTarget {
    /// A node to be created; its assigned id is reported under `token`
    New { token: String },
    /// An already persisted node
    Existing(Uid),
}

/// Edge to another node, optionally weighted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub uid: Uid,
    pub xid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl Edge {
    pub fn to(target: &EntityRef) -> Self {
        Self {
            uid: target.uid.clone(),
            xid: target.xid.clone(),
            weight: None,
        }
    }

    pub fn weighted(target: &EntityRef, weight: f64) -> Self {
        Self {
            weight: Some(weight),
            ..Self::to(target)
        }
    }
}

/// How the edges of one predicate are written
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeWrite {
    /// The predicate ends up holding exactly these edges
    Replace(Vec<Edge>),
    /// Upsert by target uid; other existing edges are kept
    Merge(Vec<Edge>),
}

/// One node mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub target: MutationTarget,
    pub kind: Kind,
    pub xid: String,
    pub attrs: BTreeMap<String, Value>,
    pub edges: BTreeMap<String, EdgeWrite>,
}

impl Mutation {
    /// Create a new node whose id will be reported under `token`
    pub fn create(token: impl Into<String>, kind: Kind, xid: impl Into<String>) -> Self {
        Self {
            target: MutationTarget::New {
                token: token.into(),
            },
            kind,
            xid: xid.into(),
            attrs: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// Update the existing node `uid`
    pub fn update(uid: Uid, kind: Kind, xid: impl Into<String>) -> Self {
        Self {
            target: MutationTarget::Existing(uid),
            kind,
            xid: xid.into(),
            attrs: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    pub fn mode(&self) -> MutationMode {
        match self.target {
            MutationTarget::New { .. } => MutationMode::Create,
            MutationTarget::Existing(_) => MutationMode::Update,
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn edges(mut self, predicate: impl Into<String>, write: EdgeWrite) -> Self {
        self.edges.insert(predicate.into(), write);
        self
    }

    /// Replace a single-valued relation
    pub fn relation(self, predicate: impl Into<String>, target: &EntityRef) -> Self {
        self.edges(predicate, EdgeWrite::Replace(vec![Edge::to(target)]))
    }
}

/// Ids assigned by a create, keyed by the token the caller chose
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assigned {
    pub uids: HashMap<String, Uid>,
}

impl Assigned {
    pub fn uid(&self, token: &str) -> Option<&Uid> {
        self.uids.get(token)
    }
}

/// A node as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub uid: Uid,
    pub xid: String,
    pub kind: Kind,
    pub attrs: BTreeMap<String, Value>,
    pub edges: BTreeMap<String, Vec<Edge>>,
}

impl StoredNode {
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(Value::as_f64)
    }

    /// Edges of a predicate, empty when the predicate was never written
    pub fn edges(&self, predicate: &str) -> &[Edge] {
        self.edges.get(predicate).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Target of a single-valued relation
    pub fn relation(&self, predicate: &str) -> Option<&Edge> {
        self.edges(predicate).first()
    }
}

/// Persistent graph primitives consumed by the engine
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Apply one mutation; creates report their assigned id in `Assigned`
    async fn mutate(&self, mutation: Mutation) -> Result<Assigned, StoreError>;

    /// Resolve an external id within a kind; `Ok(None)` means confirmed absent
    async fn lookup(&self, xid: &str, kind: Kind) -> Result<Option<Uid>, StoreError>;

    /// Read a node by internal id
    async fn node(&self, uid: &Uid) -> Result<Option<StoredNode>, StoreError>;
}
