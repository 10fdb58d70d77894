use serde::Serialize;
use stow_core::db::{PassLogEntry, RecordStore, StateCount};
use stow_core::RecordKind;

use crate::commands::common::{format_sync_timestamp, Session};
use crate::error::CliError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindStatus {
    pub kind: RecordKind,
    pub local_only: u64,
    pub synced: u64,
    pub pending_update: u64,
    pub pending_delete: u64,
    pub last_attempt_at: Option<String>,
    pub last_success_at: Option<String>,
    pub last_failed: u64,
}

impl KindStatus {
    const fn empty(kind: RecordKind) -> Self {
        Self {
            kind,
            local_only: 0,
            synced: 0,
            pending_update: 0,
            pending_delete: 0,
            last_attempt_at: None,
            last_success_at: None,
            last_failed: 0,
        }
    }

    pub const fn pending(&self) -> u64 {
        self.local_only + self.pending_update + self.pending_delete
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub owner: String,
    pub sync_configured: bool,
    pub kinds: Vec<KindStatus>,
}

pub async fn run_status(session: &Session, as_json: bool) -> Result<StatusReport, CliError> {
    let counts = session.store().status_counts(session.owner()).await?;
    let log = session.store().pass_log(session.owner()).await?;
    let report = StatusReport {
        owner: session.owner().to_string(),
        sync_configured: session.engine().is_ok(),
        kinds: summarize_status(&counts, &log),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(report)
}

/// One row per kind, in sync order, whether or not the kind has records
pub fn summarize_status(counts: &[StateCount], log: &[PassLogEntry]) -> Vec<KindStatus> {
    RecordKind::ALL
        .into_iter()
        .map(|kind| {
            let mut status = KindStatus::empty(kind);
            for count in counts.iter().filter(|count| count.kind == kind) {
                match count.state.as_str() {
                    "local_only" => status.local_only += count.count,
                    "synced" => status.synced += count.count,
                    "pending_update" => status.pending_update += count.count,
                    "pending_delete" => status.pending_delete += count.count,
                    _ => {}
                }
            }
            if let Some(entry) = log.iter().find(|entry| entry.kind == kind) {
                status.last_attempt_at = Some(format_sync_timestamp(entry.last_attempt_at));
                status.last_success_at = entry.last_success_at.map(format_sync_timestamp);
                status.last_failed = entry.last_failed;
            }
            status
        })
        .collect()
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let mut lines = vec![format!(
        "owner: {} (sync {})",
        report.owner,
        if report.sync_configured {
            "configured"
        } else {
            "not configured"
        }
    )];

    for status in &report.kinds {
        let kind = status.kind.as_str();
        let last_pass = match (&status.last_attempt_at, &status.last_success_at) {
            (None, _) => "never synced".to_string(),
            (Some(attempt), Some(success)) if attempt == success => {
                format!("last pass {attempt}")
            }
            (Some(attempt), success) => format!(
                "last pass {attempt} ({} failed), last success {}",
                status.last_failed,
                success.as_deref().unwrap_or("never")
            ),
        };
        lines.push(format!(
            "{kind:<5}  {synced} synced, {pending} pending ({} new, {} edited, {} deleted)  {last_pass}",
            status.local_only,
            status.pending_update,
            status.pending_delete,
            synced = status.synced,
            pending = status.pending(),
        ));
    }
    lines
}
