use stow_core::RecordKind;

use crate::commands::common::{format_record_lines, list_records, RecordListItem, Session};
use crate::error::CliError;

pub async fn run_list(
    session: &Session,
    kind: Option<RecordKind>,
    pending_only: bool,
    limit: usize,
    as_json: bool,
) -> Result<Vec<RecordListItem>, CliError> {
    let items = list_records(session, kind, pending_only, limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No records.");
    } else {
        for line in format_record_lines(&items) {
            println!("{line}");
        }
    }

    Ok(items)
}
