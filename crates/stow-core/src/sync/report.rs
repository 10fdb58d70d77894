//! Pass identity and outcome counters

use std::fmt;

use serde::Serialize;

use crate::models::{OwnerId, RecordKind};
use crate::util::unix_millis_now;

/// The unit passes are scheduled and serialized by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PassKey {
    pub owner: OwnerId,
    pub kind: RecordKind,
}

impl PassKey {
    pub const fn new(owner: OwnerId, kind: RecordKind) -> Self {
        Self { owner, kind }
    }
}

impl fmt::Display for PassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.kind)
    }
}

/// What a single pass did.
///
/// `created`, `updated`, and `deleted` count accepted remote calls;
/// `superseded` counts those whose success transition was not (fully) applied
/// because the record changed while the call was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub owner: OwnerId,
    pub kind: RecordKind,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Rows removed locally without a remote call
    pub discarded: usize,
    pub failed: usize,
    /// Pending records left alone because the probe reported offline
    pub skipped_offline: usize,
    pub superseded: usize,
    pub started_at: i64,
    pub finished_at: i64,
}

/// Result of processing one record within a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Created { superseded: bool },
    Updated { superseded: bool },
    Deleted,
    Discarded,
    Failed,
    /// Record no longer eligible when its turn came
    Skipped,
}

impl PassReport {
    pub fn new(owner: OwnerId, kind: RecordKind) -> Self {
        let now = unix_millis_now();
        Self {
            owner,
            kind,
            created: 0,
            updated: 0,
            deleted: 0,
            discarded: 0,
            failed: 0,
            skipped_offline: 0,
            superseded: 0,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created { superseded } => {
                self.created += 1;
                self.superseded += usize::from(superseded);
            }
            Outcome::Updated { superseded } => {
                self.updated += 1;
                self.superseded += usize::from(superseded);
            }
            Outcome::Deleted => self.deleted += 1,
            Outcome::Discarded => self.discarded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => {}
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = unix_millis_now();
        self
    }

    /// Nothing failed and nothing was skipped
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped_offline == 0
    }

    /// Whether the pass touched any record
    pub const fn did_work(&self) -> bool {
        self.created + self.updated + self.deleted + self.discarded + self.failed > 0
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped_offline > 0 {
            return write!(
                f,
                "{}: offline, {} pending record(s) left for the next pass",
                self.kind, self.skipped_offline
            );
        }
        write!(
            f,
            "{}: {} created, {} updated, {} deleted, {} discarded, {} failed",
            self.kind, self.created, self.updated, self.deleted, self.discarded, self.failed
        )?;
        if self.superseded > 0 {
            write!(f, " ({} changed mid-flight)", self.superseded)?;
        }
        Ok(())
    }
}
