//! Per-identity async locks
//!
//! Uploads and deletions touching the same identity are serialized; distinct
//! identities proceed in parallel. Map entries live only while someone holds
//! or waits for the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct PathLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> PathLockGuard {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };

        let guard = entry.lock_owned().await;
        debug!("Acquired lock for {}", key);

        PathLockGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of identities currently locked or waited on
    pub fn active_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

pub struct PathLockGuard {
    key: String,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PathLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        // release first so the strong count below only sees other holders
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let unused = locks
            .get(&self.key)
            .map(|entry| Arc::strong_count(entry) == 1)
            .unwrap_or(false);
        if unused {
            locks.remove(&self.key);
        }
    }
}
