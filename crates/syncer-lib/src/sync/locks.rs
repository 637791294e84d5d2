//! Per-key write serialization
//!
//! Two syncs racing on the same external id would both resolve "absent" and
//! both create. Every create-or-get path takes the key's lock first, so at
//! most one writer per (kind, external id) runs at a time.

use crate::models::Kind;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of async locks keyed by (kind, external id)
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `xid` within `kind`
    pub async fn lock(&self, kind: Kind, xid: &str) -> KeyGuard {
        let key = format!("{}/{}", kind.discriminator(), xid);
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        KeyGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently locked or waited on
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Held lock on one key; released on drop
pub struct KeyGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left means nobody is waiting
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.lock(Kind::Pod, "default:web-0").await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(Kind::Pod, "default:web-0").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_kinds_do_not_share_keys() {
        let locks = KeyedLocks::new();
        let _pod = locks.lock(Kind::Pod, "default:web").await;
        let _deployment = locks.lock(Kind::Deployment, "default:web").await;
        assert_eq!(locks.active(), 2);
    }
}
