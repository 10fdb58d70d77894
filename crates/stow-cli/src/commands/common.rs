use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use stow_core::config::{EngineConfig, API_BASE_URL_VAR};
use stow_core::db::{Database, LibSqlRecordStore, RecordStore, SyncFilter};
use stow_core::models::Payload;
use stow_core::sync::InFlightCreates;
use stow_core::{
    LocalId, MutationIntents, Note, OwnerId, RecordKind, SyncEngine, SyncedRecord, Task,
    TimerConfig,
};
use tracing::warn;

use crate::error::CliError;

/// How long a command waits for the passes its mutation scheduled
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub kind: RecordKind,
    pub preview: String,
    pub state: &'static str,
    pub remote_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

/// Local store access for one owner, with the sync engine when configured
pub struct Session {
    owner: OwnerId,
    store: Arc<LibSqlRecordStore>,
    intents: MutationIntents<LibSqlRecordStore>,
    engine: Option<SyncEngine>,
}

impl Session {
    /// Store-only session: mutations are persisted and wait for a later sync
    pub fn local(store: Arc<LibSqlRecordStore>, owner: OwnerId) -> Self {
        let intents = MutationIntents::new(Arc::clone(&store), InFlightCreates::new(), None);
        Self {
            owner,
            store,
            intents,
            engine: None,
        }
    }

    pub fn with_engine(engine: SyncEngine, owner: OwnerId) -> Self {
        Self {
            owner,
            store: Arc::clone(engine.store()),
            intents: engine.intents().clone(),
            engine: Some(engine),
        }
    }

    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn store(&self) -> &LibSqlRecordStore {
        &self.store
    }

    pub const fn intents(&self) -> &MutationIntents<LibSqlRecordStore> {
        &self.intents
    }

    pub fn engine(&self) -> Result<&SyncEngine, CliError> {
        self.engine.as_ref().ok_or(CliError::SyncNotConfigured)
    }

    /// Let scheduled passes finish, then stop the engine
    pub async fn close(self) {
        if let Some(engine) = self.engine {
            if !engine.drain(DRAIN_TIMEOUT).await {
                warn!("sync passes still running at exit; pending changes stay queued locally");
            }
            engine.shutdown().await;
        }
    }
}

pub async fn open_session(db_path: &Path, owner: OwnerId) -> Result<Session, CliError> {
    let db = Database::open(db_path).await?;
    match engine_config_from_env()? {
        Some(config) => Ok(Session::with_engine(SyncEngine::open(db, &config)?, owner)),
        None => Ok(Session::local(Arc::new(LibSqlRecordStore::new(db)), owner)),
    }
}

pub fn engine_config_from_env() -> Result<Option<EngineConfig>, CliError> {
    engine_config_from_lookup(|name| env::var(name).ok())
}

/// `None` when no remote service is configured; sync commands then refuse to run
pub fn engine_config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<EngineConfig>, CliError> {
    let configured = lookup(API_BASE_URL_VAR).is_some_and(|value| !value.trim().is_empty());
    if !configured {
        return Ok(None);
    }
    Ok(Some(EngineConfig::from_lookup(lookup)?))
}

pub fn resolve_owner(cli_owner: Option<String>) -> Result<OwnerId, CliError> {
    let raw = cli_owner.or_else(|| env::var("STOW_OWNER_ID").ok());
    OwnerId::resolve(raw).map_err(|_| CliError::MissingOwner)
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("STOW_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stow")
        .join("stow.db")
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let normalized = id.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    if !normalized
        .chars()
        .all(|ch| ch.is_ascii_hexdigit() || ch == '-')
    {
        return Err(CliError::RecordNotFound(id.trim().to_string()));
    }
    Ok(normalized)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Find the record an ID or unique ID prefix refers to, across every kind
pub async fn resolve_record(
    session: &Session,
    query: &str,
) -> Result<(RecordKind, LocalId), CliError> {
    let normalized = normalize_record_identifier(query)?;
    let matches = session
        .store()
        .find_by_prefix(session.owner(), &normalized, 3)
        .await?;

    if let Some(exact) = matches
        .iter()
        .find(|(_, local_id)| local_id.to_string() == normalized)
    {
        return Ok(*exact);
    }

    match matches.as_slice() {
        [] => Err(CliError::RecordNotFound(normalized)),
        [single] => Ok(*single),
        _ => {
            let options = matches
                .iter()
                .map(|(_, local_id)| short_id(local_id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{normalized}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Resolve `query` and load it as a record of kind `T`
pub async fn require_record<T: Payload>(
    session: &Session,
    query: &str,
) -> Result<SyncedRecord<T>, CliError> {
    let (kind, local_id) = resolve_record(session, query).await?;
    if kind != T::KIND {
        return Err(CliError::WrongKind {
            id: short_id(&local_id),
            expected: T::KIND,
            actual: kind,
        });
    }
    session
        .store()
        .get::<T>(session.owner(), &local_id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(local_id.to_string()))
}

pub async fn list_records(
    session: &Session,
    kind: Option<RecordKind>,
    pending_only: bool,
    limit: usize,
) -> Result<Vec<RecordListItem>, CliError> {
    let now_ms = Utc::now().timestamp_millis();
    let kinds = kind.map_or_else(|| RecordKind::ALL.to_vec(), |kind| vec![kind]);

    let mut items = Vec::new();
    for kind in kinds {
        match kind {
            RecordKind::Note => {
                for record in fetch_records::<Note>(session, pending_only).await? {
                    items.push(to_list_item(&record, note_preview(&record.payload, 80), now_ms));
                }
            }
            RecordKind::Task => {
                for record in fetch_records::<Task>(session, pending_only).await? {
                    items.push(to_list_item(&record, task_preview(&record.payload, 80), now_ms));
                }
            }
            RecordKind::Timer => {
                for record in fetch_records::<TimerConfig>(session, pending_only).await? {
                    items.push(to_list_item(&record, timer_preview(&record.payload), now_ms));
                }
            }
        }
    }

    items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    items.truncate(limit);
    Ok(items)
}

async fn fetch_records<T: Payload>(
    session: &Session,
    pending_only: bool,
) -> Result<Vec<SyncedRecord<T>>, CliError> {
    let store = session.store();
    let records = if pending_only {
        store
            .list_where::<T>(session.owner(), SyncFilter::Unsynced)
            .await?
    } else {
        store.list_all::<T>(session.owner()).await?
    };
    Ok(records)
}

fn to_list_item<T: Payload>(
    record: &SyncedRecord<T>,
    preview: String,
    now_ms: i64,
) -> RecordListItem {
    RecordListItem {
        id: record.local_id.to_string(),
        kind: T::KIND,
        preview,
        state: record.state.label(),
        remote_id: record.remote_id().map(ToString::to_string),
        created_at: record.created_at,
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
    }
}

pub fn format_record_lines(items: &[RecordListItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let short_id = item.id.chars().take(13).collect::<String>();
            let preview = truncate_preview(&item.preview, 40);
            format!(
                "{short_id:<13}  {kind:<5}  {preview:<40}  {state:<14}  {relative_time}",
                kind = item.kind.as_str(),
                state = item.state,
                relative_time = item.relative_time,
            )
        })
        .collect()
}

pub fn short_id(local_id: &LocalId) -> String {
    local_id.to_string().chars().take(13).collect()
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    truncate_preview(&note.title_preview(usize::MAX), max_chars)
}

pub fn task_preview(task: &Task, max_chars: usize) -> String {
    let mark = if task.completed { "[x]" } else { "[ ]" };
    format!("{mark} {}", truncate_preview(&task.text, max_chars.saturating_sub(4)))
}

pub fn timer_preview(config: &TimerConfig) -> String {
    format!(
        "focus {}m, breaks {}m/{}m, long break every {}",
        config.focus_minutes,
        config.short_break_minutes,
        config.long_break_minutes,
        config.sessions_before_long_break
    )
}

pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
