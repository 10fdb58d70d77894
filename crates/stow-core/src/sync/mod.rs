//! Reconciliation of the local store with the remote service.
//!
//! A [`SyncCoordinator`] runs one pass for an (owner, kind) pair: creates, then
//! updates, then deletes. The [`SyncScheduler`] owns pass lifetime: it runs
//! passes on background tasks, coalesces repeated requests, and cancels
//! everything on shutdown.

mod coordinator;
mod inflight;
mod locks;
mod report;
mod scheduler;

pub use coordinator::{BackfillReport, PassRunner, PassSettings, SyncContext, SyncCoordinator};
pub use inflight::{CreateClaim, InFlightCreates};
pub use locks::PassLocks;
pub use report::{PassKey, PassReport};
pub use scheduler::{SyncHandle, SyncScheduler};
