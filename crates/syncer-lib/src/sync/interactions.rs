//! Weighted pod-to-pod interaction edges

use super::identity::{IdentityResolver, Resolution};
use super::locks::KeyedLocks;
use crate::error::SyncError;
use crate::graph::GraphStore;
use crate::models::{EntityRef, Kind, PodEntity, WeightedRef};
use crate::observability::SyncMetrics;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Records traffic between already persisted pods
pub struct InteractionRecorder {
    store: Arc<dyn GraphStore>,
    identity: IdentityResolver,
    locks: KeyedLocks,
    metrics: SyncMetrics,
}

impl InteractionRecorder {
    pub fn new(store: Arc<dyn GraphStore>, locks: KeyedLocks) -> Self {
        Self {
            identity: IdentityResolver::new(store.clone()),
            store,
            locks,
            metrics: SyncMetrics::new(),
        }
    }

    /// Attach weighted edges from `source` to each resolvable destination
    ///
    /// `destinations[i]` is paired with `counts[i]`. The source must already
    /// exist; it is never created here. Destinations that do not resolve are
    /// skipped. A later call for the same pair replaces the weight, edges to
    /// other destinations are kept. Returns the number of edges written.
    pub async fn store_interactions(
        &self,
        source: &str,
        destinations: &[String],
        counts: &[f64],
    ) -> Result<usize, SyncError> {
        if destinations.len() != counts.len() {
            return Err(SyncError::LengthMismatch {
                destinations: destinations.len(),
                counts: counts.len(),
            });
        }

        let _guard = self.locks.lock(Kind::Pod, source).await;

        let source_uid = self
            .identity
            .resolve(source, Kind::Pod)
            .await
            .into_result(Kind::Pod, source)?
            .ok_or_else(|| SyncError::NotYetPersisted {
                kind: Kind::Pod,
                xid: source.to_string(),
            })?;

        let mut entity = PodEntity::persisted(source_uid, source);
        for (destination, count) in destinations.iter().zip(counts) {
            match self.identity.resolve(destination, Kind::Pod).await {
                Resolution::Found(uid) => entity.interactions.push(WeightedRef {
                    target: EntityRef::new(uid, destination.as_str()),
                    count: *count,
                }),
                Resolution::NotFound => {
                    warn!(
                        source = %source,
                        destination = %destination,
                        "Interaction destination not persisted, skipping"
                    );
                    self.metrics.inc_unresolved_relations();
                }
                Resolution::LookupFailed(e) => {
                    error!(
                        source = %source,
                        destination = %destination,
                        error = %e,
                        "Interaction destination lookup failed, skipping"
                    );
                    self.metrics.inc_lookup_failures();
                }
            }
        }

        let written = entity.interactions.len();
        if written == 0 {
            debug!(source = %source, "No interaction destination resolved");
            return Ok(0);
        }

        self.store.mutate(entity.into_mutation("pod")).await?;
        self.metrics.add_interaction_edges(written as u64);
        debug!(source = %source, edges = written, "Interactions recorded");
        Ok(written)
    }
}
