//! Record store implementation

use std::sync::Arc;

use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Row, Value};
use serde::Serialize;
use tokio::sync::Mutex;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{LocalId, OwnerId, Payload, RecordKind, RemoteId, SyncState, SyncedRecord};

const RECORD_COLUMNS: &str =
    "local_id, owner, remote_id, state, payload, revision, created_at, updated_at";

/// Sync-state predicate for [`RecordStore::list_where`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFilter {
    /// Never accepted remotely and not marked for deletion
    LocalOnly,
    Synced,
    PendingUpdate,
    PendingDelete,
    /// Anything a pass still has to look at
    Unsynced,
}

impl SyncFilter {
    const fn clause(self) -> &'static str {
        match self {
            Self::LocalOnly => "state = 'local_only' AND remote_id IS NULL",
            Self::Synced => "state = 'synced'",
            Self::PendingUpdate => "state = 'pending_update'",
            Self::PendingDelete => "state = 'pending_delete'",
            Self::Unsynced => "state <> 'synced'",
        }
    }
}

/// Number of records of one kind in one state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateCount {
    pub kind: RecordKind,
    pub state: String,
    pub count: u64,
}

/// Last pass bookkeeping for one owner/kind pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassLogEntry {
    pub kind: RecordKind,
    pub last_attempt_at: i64,
    pub last_success_at: Option<i64>,
    pub last_failed: u64,
}

/// Keyed, owner-scoped storage of synced records.
///
/// `update` and `delete` are compare-and-swap writes: they only apply when the
/// stored revision still equals the caller's expected revision, and report
/// `false` (nothing written) otherwise.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Insert a new record
    async fn insert<T: Payload>(&self, record: &SyncedRecord<T>) -> Result<()>;

    /// Overwrite payload, state, and `updated_at` if `record.revision` is current.
    /// The stored revision becomes `record.revision + 1`.
    async fn update<T: Payload>(&self, record: &SyncedRecord<T>) -> Result<bool>;

    /// Remove a record if `expected_revision` is current
    async fn delete<T: Payload>(
        &self,
        owner: &OwnerId,
        local_id: &LocalId,
        expected_revision: i64,
    ) -> Result<bool>;

    /// Point lookup by local id
    async fn get<T: Payload>(
        &self,
        owner: &OwnerId,
        local_id: &LocalId,
    ) -> Result<Option<SyncedRecord<T>>>;

    /// Point lookup by remote id
    async fn get_by_remote_id<T: Payload>(
        &self,
        owner: &OwnerId,
        remote_id: &RemoteId,
    ) -> Result<Option<SyncedRecord<T>>>;

    /// Every record of the kind, oldest first
    async fn list_all<T: Payload>(&self, owner: &OwnerId) -> Result<Vec<SyncedRecord<T>>>;

    /// Records matching a sync-state predicate, oldest first
    async fn list_where<T: Payload>(
        &self,
        owner: &OwnerId,
        filter: SyncFilter,
    ) -> Result<Vec<SyncedRecord<T>>>;

    /// Record counts grouped by kind and state
    async fn status_counts(&self, owner: &OwnerId) -> Result<Vec<StateCount>>;

    /// Remember the outcome of a completed pass
    async fn record_pass(
        &self,
        owner: &OwnerId,
        kind: RecordKind,
        attempted_at: i64,
        failed: u64,
    ) -> Result<()>;

    /// Last pass bookkeeping per kind
    async fn pass_log(&self, owner: &OwnerId) -> Result<Vec<PassLogEntry>>;
}

/// libSQL implementation of `RecordStore`
#[derive(Clone)]
pub struct LibSqlRecordStore {
    db: Arc<Mutex<Database>>,
}

impl LibSqlRecordStore {
    /// Wrap an opened (and migrated) database
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open an in-memory store (primarily for tests)
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    /// Resolve records of any kind whose local id starts with `prefix`
    pub async fn find_by_prefix(
        &self,
        owner: &OwnerId,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<(RecordKind, LocalId)>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT kind, local_id FROM records
                 WHERE owner = ? AND local_id LIKE ?
                 ORDER BY updated_at DESC
                 LIMIT ?",
                Params::Positional(vec![
                    text(owner.as_str()),
                    text(format!("{prefix}%")),
                    Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)),
                ]),
            )
            .await?;

        let mut matches = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(0)?;
            let local_id: String = row.get(1)?;
            matches.push((kind.parse()?, parse_local_id(&local_id)?));
        }
        Ok(matches)
    }

    async fn query_records<T: Payload>(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<SyncedRecord<T>>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(sql, Params::Positional(params))
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_record(&row)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for LibSqlRecordStore {
    async fn insert<T: Payload>(&self, record: &SyncedRecord<T>) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO records (local_id, kind, owner, remote_id, state, payload, revision, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                Params::Positional(vec![
                    text(record.local_id.as_str()),
                    text(T::KIND.as_str()),
                    text(record.owner.as_str()),
                    opt_text(record.remote_id()),
                    text(record.state.label()),
                    text(payload),
                    Value::Integer(record.revision),
                    Value::Integer(record.created_at),
                    Value::Integer(record.updated_at),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn update<T: Payload>(&self, record: &SyncedRecord<T>) -> Result<bool> {
        let payload = serde_json::to_string(&record.payload)?;
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .execute(
                "UPDATE records
                 SET payload = ?, state = ?, remote_id = ?, updated_at = ?, revision = revision + 1
                 WHERE local_id = ? AND owner = ? AND kind = ? AND revision = ?",
                Params::Positional(vec![
                    text(payload),
                    text(record.state.label()),
                    opt_text(record.remote_id()),
                    Value::Integer(record.updated_at),
                    text(record.local_id.as_str()),
                    text(record.owner.as_str()),
                    text(T::KIND.as_str()),
                    Value::Integer(record.revision),
                ]),
            )
            .await?;
        Ok(rows == 1)
    }

    async fn delete<T: Payload>(
        &self,
        owner: &OwnerId,
        local_id: &LocalId,
        expected_revision: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db
            .connection()
            .execute(
                "DELETE FROM records WHERE local_id = ? AND owner = ? AND kind = ? AND revision = ?",
                Params::Positional(vec![
                    text(local_id.as_str()),
                    text(owner.as_str()),
                    text(T::KIND.as_str()),
                    Value::Integer(expected_revision),
                ]),
            )
            .await?;
        Ok(rows == 1)
    }

    async fn get<T: Payload>(
        &self,
        owner: &OwnerId,
        local_id: &LocalId,
    ) -> Result<Option<SyncedRecord<T>>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE local_id = ? AND owner = ? AND kind = ?"
        );
        let records = self
            .query_records(
                &sql,
                vec![
                    text(local_id.as_str()),
                    text(owner.as_str()),
                    text(T::KIND.as_str()),
                ],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn get_by_remote_id<T: Payload>(
        &self,
        owner: &OwnerId,
        remote_id: &RemoteId,
    ) -> Result<Option<SyncedRecord<T>>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE remote_id = ? AND owner = ? AND kind = ?"
        );
        let records = self
            .query_records(
                &sql,
                vec![
                    text(remote_id.as_str()),
                    text(owner.as_str()),
                    text(T::KIND.as_str()),
                ],
            )
            .await?;
        Ok(records.into_iter().next())
    }

    async fn list_all<T: Payload>(&self, owner: &OwnerId) -> Result<Vec<SyncedRecord<T>>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE owner = ? AND kind = ?
             ORDER BY created_at ASC, local_id ASC"
        );
        self.query_records(&sql, vec![text(owner.as_str()), text(T::KIND.as_str())])
            .await
    }

    async fn list_where<T: Payload>(
        &self,
        owner: &OwnerId,
        filter: SyncFilter,
    ) -> Result<Vec<SyncedRecord<T>>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE owner = ? AND kind = ? AND ({})
             ORDER BY created_at ASC, local_id ASC",
            filter.clause()
        );
        self.query_records(&sql, vec![text(owner.as_str()), text(T::KIND.as_str())])
            .await
    }

    async fn status_counts(&self, owner: &OwnerId) -> Result<Vec<StateCount>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT kind, state, COUNT(*) FROM records
                 WHERE owner = ?
                 GROUP BY kind, state
                 ORDER BY kind, state",
                [owner.as_str()],
            )
            .await?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(0)?;
            counts.push(StateCount {
                kind: kind.parse()?,
                state: row.get(1)?,
                count: u64::try_from(row.get::<i64>(2)?).unwrap_or_default(),
            });
        }
        Ok(counts)
    }

    async fn record_pass(
        &self,
        owner: &OwnerId,
        kind: RecordKind,
        attempted_at: i64,
        failed: u64,
    ) -> Result<()> {
        let success_at = if failed == 0 {
            Value::Integer(attempted_at)
        } else {
            Value::Null
        };
        let db = self.db.lock().await;
        db.connection()
            .execute(
                "INSERT INTO sync_passes (owner, kind, last_attempt_at, last_success_at, last_failed)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(owner, kind) DO UPDATE SET
                     last_attempt_at = excluded.last_attempt_at,
                     last_success_at = COALESCE(excluded.last_success_at, sync_passes.last_success_at),
                     last_failed = excluded.last_failed",
                Params::Positional(vec![
                    text(owner.as_str()),
                    text(kind.as_str()),
                    Value::Integer(attempted_at),
                    success_at,
                    Value::Integer(i64::try_from(failed).unwrap_or(i64::MAX)),
                ]),
            )
            .await?;
        Ok(())
    }

    async fn pass_log(&self, owner: &OwnerId) -> Result<Vec<PassLogEntry>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT kind, last_attempt_at, last_success_at, last_failed
                 FROM sync_passes WHERE owner = ? ORDER BY kind",
                [owner.as_str()],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(0)?;
            let last_success_at = match row.get_value(2)? {
                Value::Integer(value) => Some(value),
                _ => None,
            };
            entries.push(PassLogEntry {
                kind: kind.parse()?,
                last_attempt_at: row.get(1)?,
                last_success_at,
                last_failed: u64::try_from(row.get::<i64>(3)?).unwrap_or_default(),
            });
        }
        Ok(entries)
    }
}

fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

fn opt_text(value: Option<&RemoteId>) -> Value {
    value.map_or(Value::Null, |remote_id| text(remote_id.as_str()))
}

fn parse_local_id(raw: &str) -> Result<LocalId> {
    raw.parse()
        .map_err(|error| Error::LocalStorage(format!("invalid stored local id '{raw}': {error}")))
}

/// Parse a record from a row selected with `RECORD_COLUMNS`
fn parse_record<T: Payload>(row: &Row) -> Result<SyncedRecord<T>> {
    let local_id: String = row.get(0)?;
    let owner: String = row.get(1)?;
    let remote_id = match row.get_value(2)? {
        Value::Null => None,
        Value::Text(value) => Some(RemoteId::new(value)?),
        other => {
            return Err(Error::LocalStorage(format!(
                "unexpected remote_id column value: {other:?}"
            )))
        }
    };
    let state: String = row.get(3)?;
    let payload: String = row.get(4)?;

    Ok(SyncedRecord {
        local_id: parse_local_id(&local_id)?,
        owner: OwnerId::new(owner)
            .map_err(|_| Error::LocalStorage(format!("record {local_id} has no owner")))?,
        payload: serde_json::from_str(&payload)?,
        state: SyncState::from_columns(&state, remote_id)?,
        revision: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
