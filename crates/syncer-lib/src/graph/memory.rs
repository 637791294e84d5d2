//! In-memory graph store
//!
//! Keeps nodes in a hash map keyed by internal id with a unique index on
//! (kind, external id). Used by tests and by the agent when no external
//! graph database is configured.

use super::{Assigned, Edge, EdgeWrite, GraphStore, Mutation, MutationTarget, StoredNode};
use crate::error::StoreError;
use crate::models::{Kind, Uid};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct GraphState {
    nodes: HashMap<Uid, StoredNode>,
    index: HashMap<(Kind, String), Uid>,
    next_id: u64,
}

impl GraphState {
    fn allocate(&mut self) -> Uid {
        self.next_id += 1;
        Uid::new(format!("0x{:x}", self.next_id))
    }
}

/// Graph store backed by process memory
#[derive(Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
    mutations: AtomicU64,
    fail_mutations: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following mutation fail with `StoreError::Unavailable`
    pub fn set_fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// Make every following lookup fail with `StoreError::Unavailable`
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Number of mutations applied successfully
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// All nodes of a kind, ordered by internal id
    pub async fn nodes_of_kind(&self, kind: Kind) -> Vec<StoredNode> {
        let state = self.state.read().await;
        let mut nodes: Vec<StoredNode> = state
            .nodes
            .values()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.uid.cmp(&b.uid));
        nodes
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.nodes.is_empty()
    }
}

fn apply_edges(edges: &mut BTreeMap<String, Vec<Edge>>, writes: BTreeMap<String, EdgeWrite>) {
    for (predicate, write) in writes {
        match write {
            EdgeWrite::Replace(new_edges) => {
                edges.insert(predicate, new_edges);
            }
            EdgeWrite::Merge(new_edges) => {
                let existing = edges.entry(predicate).or_default();
                for edge in new_edges {
                    match existing.iter_mut().find(|e| e.uid == edge.uid) {
                        Some(slot) => *slot = edge,
                        None => existing.push(edge),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn mutate(&self, mutation: Mutation) -> Result<Assigned, StoreError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mutations disabled".to_string()));
        }

        let mut state = self.state.write().await;
        let mut assigned = Assigned::default();

        match mutation.target {
            MutationTarget::New { token } => {
                if token.is_empty() {
                    return Err(StoreError::MissingToken(mutation.xid));
                }
                let key = (mutation.kind, mutation.xid.clone());
                if let Some(uid) = state.index.get(&key) {
                    return Err(StoreError::Conflict {
                        kind: mutation.kind,
                        xid: mutation.xid,
                        uid: uid.clone(),
                    });
                }

                let uid = state.allocate();
                let mut attrs = mutation.attrs;
                attrs.insert(mutation.kind.discriminator().to_string(), Value::Bool(true));
                let mut edges = BTreeMap::new();
                apply_edges(&mut edges, mutation.edges);

                debug!(uid = %uid, xid = %mutation.xid, kind = %mutation.kind, "Created node");
                state.index.insert(key, uid.clone());
                state.nodes.insert(
                    uid.clone(),
                    StoredNode {
                        uid: uid.clone(),
                        xid: mutation.xid,
                        kind: mutation.kind,
                        attrs,
                        edges,
                    },
                );
                assigned.uids.insert(token, uid);
            }
            MutationTarget::Existing(uid) => {
                let node = state
                    .nodes
                    .get_mut(&uid)
                    .ok_or_else(|| StoreError::UnknownNode(uid.clone()))?;
                node.attrs.extend(mutation.attrs);
                apply_edges(&mut node.edges, mutation.edges);
            }
        }

        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(assigned)
    }

    async fn lookup(&self, xid: &str, kind: Kind) -> Result<Option<Uid>, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("lookups disabled".to_string()));
        }

        let state = self.state.read().await;
        Ok(state.index.get(&(kind, xid.to_string())).cloned())
    }

    async fn node(&self, uid: &Uid) -> Result<Option<StoredNode>, StoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("lookups disabled".to_string()));
        }

        let state = self.state.read().await;
        Ok(state.nodes.get(uid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityRef;

    async fn create(store: &MemoryGraphStore, kind: Kind, xid: &str) -> Uid {
        let assigned = store
            .mutate(Mutation::create("node", kind, xid))
            .await
            .unwrap();
        assigned.uid("node").unwrap().clone()
    }

    #[tokio::test]
    async fn test_create_assigns_uid_under_token() {
        let store = MemoryGraphStore::new();
        let assigned = store
            .mutate(
                Mutation::create("my-pod", Kind::Pod, "default:web-0").attr("name", "pod-web-0"),
            )
            .await
            .unwrap();

        let uid = assigned.uid("my-pod").unwrap();
        let node = store.node(uid).await.unwrap().unwrap();
        assert_eq!(node.attr_str("name"), Some("pod-web-0"));
        assert_eq!(node.attrs.get("isPod"), Some(&Value::Bool(true)));
        assert_eq!(
            store.lookup("default:web-0", Kind::Pod).await.unwrap(),
            Some(uid.clone())
        );
    }

    #[tokio::test]
    async fn test_same_xid_in_different_kinds() {
        let store = MemoryGraphStore::new();
        let pod = create(&store, Kind::Pod, "default:web").await;
        let deployment = create(&store, Kind::Deployment, "default:web").await;

        assert_ne!(pod, deployment);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let store = MemoryGraphStore::new();
        let uid = create(&store, Kind::Namespace, "default").await;

        let err = store
            .mutate(Mutation::create("again", Kind::Namespace, "default"))
            .await
            .unwrap_err();
        match err {
            StoreError::Conflict { uid: existing, .. } => assert_eq!(existing, uid),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_unknown_node() {
        let store = MemoryGraphStore::new();
        let err = store
            .mutate(Mutation::update(Uid::new("0x99"), Kind::Pod, "default:ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_replace_and_merge_edges() {
        let store = MemoryGraphStore::new();
        let source = create(&store, Kind::Pod, "ns:a").await;
        let b = EntityRef::new(create(&store, Kind::Pod, "ns:b").await, "ns:b");
        let c = EntityRef::new(create(&store, Kind::Pod, "ns:c").await, "ns:c");

        store
            .mutate(Mutation::update(source.clone(), Kind::Pod, "ns:a").edges(
                "pod",
                EdgeWrite::Merge(vec![Edge::weighted(&b, 5.0), Edge::weighted(&c, 1.0)]),
            ))
            .await
            .unwrap();
        store
            .mutate(
                Mutation::update(source.clone(), Kind::Pod, "ns:a")
                    .edges("pod", EdgeWrite::Merge(vec![Edge::weighted(&b, 7.0)]))
                    .edges("label", EdgeWrite::Replace(vec![Edge::to(&c)])),
            )
            .await
            .unwrap();

        let node = store.node(&source).await.unwrap().unwrap();
        let pods = node.edges("pod");
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].weight, Some(7.0));
        assert_eq!(pods[1].weight, Some(1.0));

        store
            .mutate(
                Mutation::update(source.clone(), Kind::Pod, "ns:a")
                    .edges("label", EdgeWrite::Replace(vec![])),
            )
            .await
            .unwrap();
        let node = store.node(&source).await.unwrap().unwrap();
        assert!(node.edges("label").is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryGraphStore::new();
        store.set_fail_mutations(true);
        assert!(store
            .mutate(Mutation::create("n", Kind::Node, "node-1"))
            .await
            .is_err());

        store.set_fail_lookups(true);
        assert!(store.lookup("node-1", Kind::Node).await.is_err());
        assert_eq!(store.mutation_count(), 0);
    }
}
