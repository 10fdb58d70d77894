//! stow-core - Core library for Stow
//!
//! This crate contains the shared models, the local record store, and the
//! offline-first sync engine used by every Stow interface.
//!
//! Local writes always land in the [`db::RecordStore`] first. A
//! [`sync::SyncCoordinator`] pass later pushes pending records to the remote
//! service through a [`remote::RemoteGateway`], and the
//! [`sync::SyncScheduler`] owns the lifetime of those passes.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod intents;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{Gateways, SyncEngine};
pub use error::{Error, Result};
pub use intents::{DeleteOutcome, MutationIntents};
pub use models::{
    LocalId, Note, OwnerId, RecordKind, RemoteId, SyncState, SyncedRecord, Task, TimerConfig,
};
