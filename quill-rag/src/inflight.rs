//! Per-fingerprint duplicate suppression.
//!
//! Concurrent requests with the same fingerprint serialize on a shared async
//! lock. The first holder does the expensive work and fills the cache; the
//! others wait, then find the result in the cache. If the holder fails or is
//! cancelled, the next waiter simply becomes the holder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OwnedMutexGuard;

type Slots = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Default)]
pub(crate) struct InFlight {
    slots: Mutex<Slots>,
}

/// Exclusive right to compute one fingerprint. Released on drop.
#[derive(Debug)]
pub(crate) struct Flight<'a> {
    owner: &'a InFlight,
    guard: Option<OwnedMutexGuard<()>>,
    waited: bool,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn enter(&self, key: &str) -> Flight<'_> {
        let (lock, contended) = {
            let mut slots = self.lock();
            let lock = Arc::clone(slots.entry(key.to_string()).or_default());
            // One reference in the map, one here; anything more is another request.
            let contended = Arc::strong_count(&lock) > 2;
            (lock, contended)
        };
        let guard = lock.lock_owned().await;
        Flight { owner: self, guard: Some(guard), waited: contended }
    }

    /// Number of fingerprints currently held or awaited.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Flight<'_> {
    /// Whether another request held or awaited this key when we arrived.
    pub fn waited(&self) -> bool {
        self.waited
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.lock();
        drop(self.guard.take());
        // Slots referenced only by the map have no holder and no waiter. This
        // also sweeps slots left behind by waiters that were cancelled.
        slots.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
