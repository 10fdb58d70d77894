//! Domain payload contract

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The synchronized domain types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Note,
    Task,
    Timer,
}

impl RecordKind {
    /// Every kind, in the order a full sync processes them.
    pub const ALL: [Self; 3] = [Self::Note, Self::Task, Self::Timer];

    /// Value stored in the `kind` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Task => "task",
            Self::Timer => "timer",
        }
    }

    /// REST resource segment on the remote service.
    pub const fn resource(self) -> &'static str {
        match self {
            Self::Note => "notes",
            Self::Task => "tasks",
            Self::Timer => "timers",
        }
    }

    /// Resolve a kind from its REST resource segment.
    pub fn from_resource(resource: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.resource() == resource)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" | "notes" => Ok(Self::Note),
            "task" | "tasks" => Ok(Self::Task),
            "timer" | "timers" => Ok(Self::Timer),
            other => Err(Error::InvalidInput(format!("unknown record kind '{other}'"))),
        }
    }
}

/// Domain fields carried by a synced record.
///
/// The sync engine treats payloads as opaque JSON; only `validate` is
/// consulted before a local write.
pub trait Payload:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    const KIND: RecordKind;

    /// Reject payloads that must never be persisted.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}
