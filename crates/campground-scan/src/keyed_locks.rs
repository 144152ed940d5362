use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<Mutex<()>>>;

/// One async lock per key, created on demand and dropped once nobody holds or waits on it
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<StdMutex<LockMap>>,
}

/// Held lock for one key; releasing it prunes the key when it is idle
#[derive(Debug)]
pub struct KeyedGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<StdMutex<LockMap>>,
}

impl KeyedLocks {
    /// Create an empty lock set
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let lock = lock_map(&self.locks)
            .entry(key.to_string())
            .or_default()
            .clone();

        KeyedGuard {
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        lock_map(&self.locks).len()
    }

    /// Whether no key is held or awaited
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// The map is only touched in short synchronous sections, so a poisoned map is still consistent
fn lock_map(locks: &StdMutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = lock_map(&self.locks);
        if let Some(lock) = locks.get(&self.key)
            && Arc::strong_count(lock) == 1
        {
            locks.remove(&self.key);
        }
    }
}
