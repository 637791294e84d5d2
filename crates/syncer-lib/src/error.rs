//! Error types for the synchronization engine and graph store

use crate::models::{Kind, Uid};
use thiserror::Error;

/// Failures reported by a graph store implementation
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A create was issued for an (external id, kind) pair that already exists
    #[error("{kind} with xid {xid} already exists as {uid}")]
    Conflict { kind: Kind, xid: String, uid: Uid },

    /// An update referenced an internal id the store does not know
    #[error("no node with uid {0}")]
    UnknownNode(Uid),

    /// A create carried no token to report the assigned id under
    #[error("create mutation for xid {0} has no token")]
    MissingToken(String),

    /// The store could not be reached or refused the operation
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by `store()` and `store_interactions()`
#[derive(Debug, Error)]
pub enum SyncError {
    /// An entity that must already exist has not been persisted yet
    #[error("{kind} {xid} is not persisted yet")]
    NotYetPersisted { kind: Kind, xid: String },

    /// Identity lookup failed; never treated as "not found"
    #[error("lookup of {kind} {xid} failed: {source}")]
    LookupFailed {
        kind: Kind,
        xid: String,
        #[source]
        source: StoreError,
    },

    /// The store rejected or failed to apply a mutation
    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// A create succeeded but reported no id for the requested token
    #[error("create of {xid} returned no uid for token {token}")]
    MissingAssignedId { xid: String, token: String },

    /// Destination and weight slices of an interaction call differ in length
    #[error("interaction arguments mismatch: {destinations} destinations, {counts} counts")]
    LengthMismatch { destinations: usize, counts: usize },

    /// The observed object lacks data required to identify it
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl SyncError {
    /// Whether repeating the same call later can succeed without other work
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::LookupFailed { .. }
                | SyncError::Persistence(_)
                | SyncError::MissingAssignedId { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_is_transparent() {
        let err = SyncError::from(StoreError::Unavailable("connection reset".to_string()));
        assert_eq!(err.to_string(), "graph store unavailable: connection reset");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_yet_persisted_is_not_retryable() {
        let err = SyncError::NotYetPersisted {
            kind: Kind::Pod,
            xid: "default:web-0".to_string(),
        };
        assert_eq!(err.to_string(), "pod default:web-0 is not persisted yet");
        assert!(!err.is_retryable());
    }
}
