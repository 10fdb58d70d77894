use stow_core::sync::{BackfillReport, PassReport};
use stow_core::RecordKind;

use crate::commands::common::Session;
use crate::error::CliError;

pub async fn run_sync(session: &Session, as_json: bool) -> Result<Vec<PassReport>, CliError> {
    let engine = session.engine()?;
    let reports = engine.sync_now(session.owner()).await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{report}");
        }
    }
    Ok(reports)
}

pub async fn run_backfill(session: &Session) -> Result<Vec<(RecordKind, BackfillReport)>, CliError> {
    let engine = session.engine()?;
    let reports = engine.backfill(session.owner()).await?;

    for line in format_backfill_lines(&reports) {
        println!("{line}");
    }
    Ok(reports)
}

pub fn format_backfill_lines(reports: &[(RecordKind, BackfillReport)]) -> Vec<String> {
    reports
        .iter()
        .map(|(kind, report)| {
            format!(
                "{kind}: {} imported, {} refreshed, {} unchanged",
                report.imported, report.refreshed, report.unchanged
            )
        })
        .collect()
}
