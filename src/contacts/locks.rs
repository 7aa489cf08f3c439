//! Per-contact serialization of read-modify-write sequences.
//!
//! Thread appends and contact mutations for the same contact take the same
//! lock, so cache updates and state changes never clobber each other.
//! Different contacts proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry size above which idle entries are pruned on the next lock.
const PRUNE_THRESHOLD: usize = 1024;

/// Keyed async mutexes, one per contact id.
#[derive(Default)]
pub struct ContactLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl ContactLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait for exclusive access to `contact_id`.
    pub async fn lock(&self, contact_id: Uuid) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() > PRUNE_THRESHOLD {
                // Only the registry holds an idle entry.
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(locks.entry(contact_id).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of tracked contacts (held or idle).
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
