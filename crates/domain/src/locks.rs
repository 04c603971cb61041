//! Per-key async mutual exclusion.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use common::{OrderId, UserId};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries are pruned once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// A lazily populated map of async mutexes, one per key.
///
/// Holding the guard serializes every mutation for that key within this
/// process; other keys proceed independently.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

/// Serializes cart mutations per user.
pub type UserLocks = KeyedLocks<UserId>;

/// Serializes status and tracking updates per order.
pub type OrderLocks = KeyedLocks<OrderId>;

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut entries = self.entries.lock().await;
            if entries.len() >= PRUNE_THRESHOLD {
                // Only the map holds an unused slot
                entries.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            entries.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
