//! Per-path latch registry (spec §5): implementations SHOULD serialise
//! state-mutating operations on the same logical path. This is the
//! optional serialisation the spec recommends, not a correctness
//! requirement — each underlying step is already atomic as provided by the
//! host filesystem; the latch only narrows the window for the "later
//! commit wins" race the spec accepts between whole operations.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::path::LogicalPath;

/// A registry of per-logical-path mutexes, handed out by the dispatcher
/// around each state-mutating operation.
#[derive(Default)]
pub struct PathLocks {
    locks: DashMap<PathBuf, Weak<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        PathLocks { locks: DashMap::new() }
    }

    /// Acquire the latch for `logical`, creating it if this is the first
    /// concurrent waiter. Stale entries (whose last holder has already
    /// dropped the `Arc`) are replaced rather than accumulating forever.
    pub async fn lock(&self, logical: &LogicalPath) -> OwnedMutexGuard<()> {
        let key = logical.as_path().to_path_buf();

        let mutex = if let Some(existing) = self.locks.get(&key).and_then(|w| w.upgrade()) {
            existing
        } else {
            let fresh = Arc::new(Mutex::new(()));
            self.locks.insert(key, Arc::downgrade(&fresh));
            fresh
        };

        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serialises_access_to_the_same_path() {
        let locks = Arc::new(PathLocks::new());
        let logical = LogicalPath::new("/a/b").unwrap();

        let guard = locks.lock(&logical).await;

        let locks2 = locks.clone();
        let logical2 = logical.clone();
        let acquired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let acquired2 = acquired.clone();
        let handle = tokio::spawn(async move {
            let _second = locks2.lock(&logical2).await;
            acquired2.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        tokio::task::yield_now().await;
        assert!(!acquired.load(std::sync::atomic::Ordering::SeqCst));

        drop(guard);
        handle.await.unwrap();
        assert!(acquired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn different_paths_do_not_contend() {
        let locks = PathLocks::new();
        let a = LogicalPath::new("/a").unwrap();
        let b = LogicalPath::new("/b").unwrap();
        let _g1 = locks.lock(&a).await;
        // Must not deadlock: distinct paths get distinct mutexes.
        let _g2 = locks.lock(&b).await;
    }
}
