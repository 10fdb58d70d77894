//! Mutation entry points used by the UI layer.
//!
//! Every intent writes the record store first and only then asks the
//! scheduler for a pass, so a mutation succeeds offline as long as the local
//! disk does.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::db::RecordStore;
use crate::error::{Error, Result};
use crate::models::{LocalId, OwnerId, Payload, SyncState, SyncedRecord};
use crate::sync::{InFlightCreates, SyncHandle};
use crate::util::unix_millis_now;

const MAX_WRITE_ATTEMPTS: usize = 16;

/// What a delete intent did to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Never synced: the row is gone and the remote is never contacted
    Removed,
    /// Marked for remote deletion by the next pass
    Tombstoned,
    /// Was already pending deletion
    AlreadyPending,
}

/// Insert, update, and delete intents for every payload type
pub struct MutationIntents<S> {
    store: Arc<S>,
    inflight: InFlightCreates,
    scheduler: Option<SyncHandle>,
}

impl<S> Clone for MutationIntents<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            inflight: self.inflight.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<S: RecordStore> MutationIntents<S> {
    /// `inflight` must be the registry the coordinators of the same store use.
    /// Without a scheduler, intents only write the store.
    pub fn new(store: Arc<S>, inflight: InFlightCreates, scheduler: Option<SyncHandle>) -> Self {
        Self {
            store,
            inflight,
            scheduler,
        }
    }

    /// Persist a new record as `LocalOnly` and request a pass
    pub async fn insert<T: Payload>(&self, owner: &OwnerId, payload: T) -> Result<SyncedRecord<T>> {
        payload.validate()?;
        let record = SyncedRecord::new(owner.clone(), payload);
        self.store.insert(&record).await?;
        debug!(local_id = %record.local_id, kind = %T::KIND, "record inserted");
        self.request_pass::<T>(owner);
        Ok(record)
    }

    /// Replace a record's payload.
    ///
    /// A never-synced record stays `LocalOnly`; a synced one becomes
    /// `PendingUpdate`. Records pending deletion cannot be edited.
    pub async fn update<T: Payload>(
        &self,
        owner: &OwnerId,
        local_id: &LocalId,
        payload: T,
    ) -> Result<SyncedRecord<T>> {
        payload.validate()?;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.require::<T>(owner, local_id).await?;
            let state = match current.state {
                SyncState::LocalOnly => SyncState::LocalOnly,
                SyncState::Synced { remote_id } | SyncState::PendingUpdate { remote_id } => {
                    SyncState::PendingUpdate { remote_id }
                }
                SyncState::PendingDelete { .. } => {
                    return Err(Error::Precondition(format!(
                        "{} {local_id} is pending deletion",
                        T::KIND
                    )));
                }
            };
            let mut edited = SyncedRecord {
                payload: payload.clone(),
                state,
                updated_at: unix_millis_now(),
                ..current
            };
            if self.store.update(&edited).await? {
                edited.revision += 1;
                self.request_pass::<T>(owner);
                return Ok(edited);
            }
        }
        Err(contention::<T>(local_id))
    }

    /// Delete a record, remotely too if it ever reached the remote service.
    ///
    /// A delete that races a record's in-flight create is recorded as a
    /// tombstone and resolved once the create outcome is known.
    pub async fn delete<T: Payload>(&self, owner: &OwnerId, local_id: &LocalId) -> Result<DeleteOutcome> {
        let _gate = self.inflight.lock().await;
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self.require::<T>(owner, local_id).await?;
            let tombstone = match &current.state {
                SyncState::LocalOnly if !self.inflight.is_in_flight(local_id) => {
                    if self
                        .store
                        .delete::<T>(owner, local_id, current.revision)
                        .await?
                    {
                        debug!(%local_id, kind = %T::KIND, "unsynced record removed");
                        return Ok(DeleteOutcome::Removed);
                    }
                    continue;
                }
                SyncState::LocalOnly => SyncState::PendingDelete { remote_id: None },
                SyncState::Synced { remote_id } | SyncState::PendingUpdate { remote_id } => {
                    SyncState::PendingDelete {
                        remote_id: Some(remote_id.clone()),
                    }
                }
                SyncState::PendingDelete { .. } => return Ok(DeleteOutcome::AlreadyPending),
            };

            let mut marked = current.with_state(tombstone);
            marked.updated_at = unix_millis_now();
            if self.store.update(&marked).await? {
                self.request_pass::<T>(owner);
                return Ok(DeleteOutcome::Tombstoned);
            }
        }
        Err(contention::<T>(local_id))
    }

    async fn require<T: Payload>(&self, owner: &OwnerId, local_id: &LocalId) -> Result<SyncedRecord<T>> {
        self.store
            .get::<T>(owner, local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {local_id}", T::KIND)))
    }

    fn request_pass<T: Payload>(&self, owner: &OwnerId) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.request(owner, T::KIND);
        }
    }
}

fn contention<T: Payload>(local_id: &LocalId) -> Error {
    Error::LocalStorage(format!(
        "{} {local_id} kept changing; gave up after {MAX_WRITE_ATTEMPTS} attempts",
        T::KIND
    ))
}
