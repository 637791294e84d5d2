//! Identity resolution: (external id, kind) -> internal id

use crate::error::{StoreError, SyncError};
use crate::graph::GraphStore;
use crate::models::{Kind, Uid};
use std::sync::Arc;
use tracing::debug;

/// Outcome of an identity lookup
#[derive(Debug, Clone)]
pub enum Resolution {
    Found(Uid),
    /// The store confirmed no entity exists
    NotFound,
    /// The lookup itself failed; absence is unknown
    LookupFailed(StoreError),
}

impl Resolution {
    /// Collapse into a result, turning lookup failures into errors
    pub fn into_result(self, kind: Kind, xid: &str) -> Result<Option<Uid>, SyncError> {
        match self {
            Resolution::Found(uid) => Ok(Some(uid)),
            Resolution::NotFound => Ok(None),
            Resolution::LookupFailed(source) => Err(SyncError::LookupFailed {
                kind,
                xid: xid.to_string(),
                source,
            }),
        }
    }
}

/// Resolves external ids against the graph store
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn GraphStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, xid: &str, kind: Kind) -> Resolution {
        match self.store.lookup(xid, kind).await {
            Ok(Some(uid)) => Resolution::Found(uid),
            Ok(None) => {
                debug!(xid = %xid, kind = %kind, "Entity not persisted yet");
                Resolution::NotFound
            }
            Err(e) => Resolution::LookupFailed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{MemoryGraphStore, Mutation};

    #[tokio::test]
    async fn test_resolution_states() {
        let store = Arc::new(MemoryGraphStore::new());
        let resolver = IdentityResolver::new(store.clone());

        assert!(matches!(
            resolver.resolve("default:web-0", Kind::Pod).await,
            Resolution::NotFound
        ));

        store
            .mutate(Mutation::create("pod", Kind::Pod, "default:web-0"))
            .await
            .unwrap();
        assert!(matches!(
            resolver.resolve("default:web-0", Kind::Pod).await,
            Resolution::Found(_)
        ));
        // Same text, other kind
        assert!(matches!(
            resolver.resolve("default:web-0", Kind::Deployment).await,
            Resolution::NotFound
        ));

        store.set_fail_lookups(true);
        let resolution = resolver.resolve("default:web-0", Kind::Pod).await;
        assert!(matches!(resolution, Resolution::LookupFailed(_)));
        assert!(matches!(
            resolution.into_result(Kind::Pod, "default:web-0"),
            Err(SyncError::LookupFailed { .. })
        ));
    }
}
