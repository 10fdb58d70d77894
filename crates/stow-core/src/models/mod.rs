//! Data models for Stow

mod ids;
mod note;
mod payload;
mod record;
mod task;
mod timer;

pub use ids::{LocalId, OwnerId, RemoteId};
pub use note::Note;
pub use payload::{Payload, RecordKind};
pub use record::{SyncFlags, SyncState, SyncedRecord};
pub use task::Task;
pub use timer::TimerConfig;
