//! Per-(owner, kind) pass serialization

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::PassKey;

/// One async lock per (owner, kind) pair, created on first use
#[derive(Clone, Default)]
pub struct PassLocks {
    locks: Arc<Mutex<HashMap<PassKey, Arc<AsyncMutex<()>>>>>,
}

impl PassLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other pass for `key` is running
    pub async fn acquire(&self, key: &PassKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{OwnerId, RecordKind};

    fn key(owner: &str, kind: RecordKind) -> PassKey {
        PassKey::new(OwnerId::new(owner).unwrap(), kind)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn same_pair_is_serialized() {
        let locks = PassLocks::new();
        let _held = locks.acquire(&key("u1", RecordKind::Note)).await;

        let waiting = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&key("u1", RecordKind::Note)),
        )
        .await;
        assert!(waiting.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn distinct_pairs_do_not_block() {
        let locks = PassLocks::new();
        let _notes = locks.acquire(&key("u1", RecordKind::Note)).await;
        let _tasks = locks.acquire(&key("u1", RecordKind::Task)).await;
        let _other_owner = locks.acquire(&key("u2", RecordKind::Note)).await;
    }
}
