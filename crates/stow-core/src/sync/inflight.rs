//! Registry of records whose remote create is outstanding

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::models::LocalId;

#[derive(Default)]
struct Registry {
    gate: AsyncMutex<()>,
    claimed: Mutex<HashSet<LocalId>>,
}

/// Tracks creates between dispatch and write-back.
///
/// The gate serializes a local delete of a `LocalOnly` record against the
/// coordinator claiming that record for a create and settling its outcome.
/// Holding the gate, "is this record in flight?" has a stable answer.
#[derive(Clone, Default)]
pub struct InFlightCreates {
    inner: Arc<Registry>,
}

impl InFlightCreates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the dispatch/write-back gate
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.gate.lock().await
    }

    pub fn is_in_flight(&self, local_id: &LocalId) -> bool {
        self.claimed().contains(local_id)
    }

    /// Mark a record in flight until the returned claim drops.
    /// `None` if it is already claimed.
    pub fn claim(&self, local_id: LocalId) -> Option<CreateClaim> {
        if !self.claimed().insert(local_id) {
            return None;
        }
        Some(CreateClaim {
            registry: Arc::clone(&self.inner),
            local_id,
        })
    }

    fn claimed(&self) -> std::sync::MutexGuard<'_, HashSet<LocalId>> {
        self.inner
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the in-flight mark on drop
pub struct CreateClaim {
    registry: Arc<Registry>,
    local_id: LocalId,
}

impl Drop for CreateClaim {
    fn drop(&mut self) {
        self.registry
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.local_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_and_released_on_drop() {
        let registry = InFlightCreates::new();
        let id = LocalId::new();

        let claim = registry.claim(id).unwrap();
        assert!(registry.is_in_flight(&id));
        assert!(registry.claim(id).is_none());

        drop(claim);
        assert!(!registry.is_in_flight(&id));
        assert!(registry.claim(id).is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clones_share_state() {
        let registry = InFlightCreates::new();
        let other = registry.clone();
        let id = LocalId::new();

        let _gate = registry.lock().await;
        let _claim = registry.claim(id).unwrap();
        assert!(other.is_in_flight(&id));
    }
}
