//! In-memory record storage, partitioned by owner and resource

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use stow_core::remote::RemoteRecord;
use stow_core::{OwnerId, RecordKind, RemoteId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;

type Partition = BTreeMap<String, RemoteRecord<Value>>;

/// Records held for the lifetime of the process.
///
/// Remote ids are UUID v7, so iteration order within a partition is creation order.
#[derive(Clone, Default)]
pub struct MemoryStore {
    partitions: Arc<RwLock<HashMap<(OwnerId, RecordKind), Partition>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        owner: &OwnerId,
        kind: RecordKind,
        payload: Value,
    ) -> Result<RemoteRecord<Value>, AppError> {
        let key = Uuid::now_v7().to_string();
        let record = RemoteRecord {
            remote_id: RemoteId::new(key.clone())?,
            payload,
        };
        self.partitions
            .write()
            .await
            .entry((owner.clone(), kind))
            .or_default()
            .insert(key, record.clone());
        Ok(record)
    }

    /// `None` when the owner has no such record
    pub async fn update(
        &self,
        owner: &OwnerId,
        kind: RecordKind,
        remote_id: &str,
        payload: Value,
    ) -> Option<RemoteRecord<Value>> {
        let mut partitions = self.partitions.write().await;
        let stored = partitions
            .get_mut(&(owner.clone(), kind))?
            .get_mut(remote_id)?;
        stored.payload = payload;
        Some(stored.clone())
    }

    /// Whether a record was removed
    pub async fn delete(&self, owner: &OwnerId, kind: RecordKind, remote_id: &str) -> bool {
        self.partitions
            .write()
            .await
            .get_mut(&(owner.clone(), kind))
            .is_some_and(|partition| partition.remove(remote_id).is_some())
    }

    pub async fn list(&self, owner: &OwnerId, kind: RecordKind) -> Vec<RemoteRecord<Value>> {
        self.partitions
            .read()
            .await
            .get(&(owner.clone(), kind))
            .map(|partition| partition.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Records across every owner and resource
    pub async fn total(&self) -> usize {
        self.partitions.read().await.values().map(BTreeMap::len).sum()
    }
}
