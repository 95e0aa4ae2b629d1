use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// A set of async mutexes addressed by string key.
///
/// Used for single-writer-per-session turn handling and for the per-doctor
/// critical section around check-then-create. Entries are pruned once the
/// last holder or waiter lets go, so the map only grows with live keys.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `key` is free and takes it.
    pub async fn lock(&self, key: &str) -> KeyedLockGuard<'_> {
        let entry = self.entry(key);
        let guard = entry.lock_owned().await;
        trace!("Acquired keyed lock {}", key);

        KeyedLockGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Takes the lock for `key` only if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyedLockGuard<'_>> {
        let entry = self.entry(key);
        match entry.try_lock_owned() {
            Ok(guard) => Some(KeyedLockGuard {
                owner: self,
                key: key.to_string(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.prune(key);
                None
            }
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .get(key)
            .map(|entry| entry.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    fn prune(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = locks.get(key) {
            // Only the map itself still references the mutex.
            if Arc::strong_count(entry) == 1 {
                locks.remove(key);
            }
        }
    }
}

pub struct KeyedLockGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLockGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.owner.prune(&self.key);
        trace!("Released keyed lock {}", self.key);
    }
}
