//! Local persistence layer for Stow

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::{LibSqlRecordStore, PassLogEntry, RecordStore, StateCount, SyncFilter};
