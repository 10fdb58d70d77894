//! Synced record envelope and its sync state

use serde::{Deserialize, Serialize};

use super::{LocalId, OwnerId, Payload, RemoteId};
use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// Where a record stands relative to the remote service.
///
/// A removed record has no state: its row is gone from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// Never accepted remotely
    LocalOnly,
    /// Remote and local agree
    Synced { remote_id: RemoteId },
    /// Locally modified since the last successful sync
    PendingUpdate { remote_id: RemoteId },
    /// Marked for remote deletion. `None` when the delete arrived while the
    /// record's create was still in flight.
    PendingDelete { remote_id: Option<RemoteId> },
}

/// Boolean view of a [`SyncState`], as exposed to flag-based consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncFlags {
    pub synced: bool,
    pub dirty: bool,
    pub tombstoned: bool,
}

impl SyncState {
    /// Value stored in the `state` column.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::Synced { .. } => "synced",
            Self::PendingUpdate { .. } => "pending_update",
            Self::PendingDelete { .. } => "pending_delete",
        }
    }

    /// Rebuild a state from its stored label and remote id column.
    pub fn from_columns(label: &str, remote_id: Option<RemoteId>) -> Result<Self> {
        match (label, remote_id) {
            ("local_only", None) => Ok(Self::LocalOnly),
            ("synced", Some(remote_id)) => Ok(Self::Synced { remote_id }),
            ("pending_update", Some(remote_id)) => Ok(Self::PendingUpdate { remote_id }),
            ("pending_delete", remote_id) => Ok(Self::PendingDelete { remote_id }),
            (label, remote_id) => Err(Error::LocalStorage(format!(
                "invalid stored sync state '{label}' (remote id present: {})",
                remote_id.is_some()
            ))),
        }
    }

    pub const fn remote_id(&self) -> Option<&RemoteId> {
        match self {
            Self::LocalOnly => None,
            Self::Synced { remote_id } | Self::PendingUpdate { remote_id } => Some(remote_id),
            Self::PendingDelete { remote_id } => remote_id.as_ref(),
        }
    }

    pub const fn flags(&self) -> SyncFlags {
        SyncFlags {
            synced: matches!(self, Self::Synced { .. }),
            dirty: matches!(self, Self::PendingUpdate { .. }),
            tombstoned: matches!(self, Self::PendingDelete { .. }),
        }
    }
}

/// One domain object together with its owner and sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedRecord<T> {
    pub local_id: LocalId,
    pub owner: OwnerId,
    pub payload: T,
    pub state: SyncState,
    /// Bumped by the store on every write; the compare-and-swap token.
    pub revision: i64,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local mutation timestamp (Unix ms)
    pub updated_at: i64,
}

impl<T: Payload> SyncedRecord<T> {
    /// A freshly inserted, never-synced record.
    #[must_use]
    pub fn new(owner: OwnerId, payload: T) -> Self {
        let now = unix_millis_now();
        Self {
            local_id: LocalId::new(),
            owner,
            payload,
            state: SyncState::LocalOnly,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A record imported from the remote service, already in agreement with it.
    #[must_use]
    pub fn from_remote(owner: OwnerId, remote_id: RemoteId, payload: T) -> Self {
        Self {
            state: SyncState::Synced { remote_id },
            ..Self::new(owner, payload)
        }
    }

    /// Same record moved to `state`; payload and timestamps untouched.
    #[must_use]
    pub fn with_state(&self, state: SyncState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    pub const fn remote_id(&self) -> Option<&RemoteId> {
        self.state.remote_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Note;

    fn remote(id: &str) -> RemoteId {
        RemoteId::new(id).unwrap()
    }

    #[test]
    fn new_record_is_local_only() {
        let record = SyncedRecord::new(OwnerId::new("u1").unwrap(), Note::new("t", "b"));
        assert_eq!(record.state, SyncState::LocalOnly);
        assert!(record.remote_id().is_none());
        assert_eq!(record.revision, 0);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn synced_flag_excludes_dirty_and_tombstoned() {
        let states = [
            SyncState::LocalOnly,
            SyncState::Synced {
                remote_id: remote("a"),
            },
            SyncState::PendingUpdate {
                remote_id: remote("a"),
            },
            SyncState::PendingDelete { remote_id: None },
        ];
        for state in states {
            let flags = state.flags();
            if flags.synced {
                assert!(!flags.dirty && !flags.tombstoned);
            }
        }
    }

    #[test]
    fn from_columns_rejects_illegal_combinations() {
        assert!(SyncState::from_columns("synced", None).is_err());
        assert!(SyncState::from_columns("pending_update", None).is_err());
        assert!(SyncState::from_columns("local_only", Some(remote("r"))).is_err());
        assert!(SyncState::from_columns("archived", None).is_err());
        assert_eq!(
            SyncState::from_columns("pending_delete", None).unwrap(),
            SyncState::PendingDelete { remote_id: None }
        );
    }

    #[test]
    fn labels_round_trip() {
        let state = SyncState::PendingUpdate {
            remote_id: remote("r-1"),
        };
        let rebuilt =
            SyncState::from_columns(state.label(), state.remote_id().cloned()).unwrap();
        assert_eq!(rebuilt, state);
    }
}
