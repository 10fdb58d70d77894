use stow_core::{LocalId, Note};

use crate::commands::common::{require_record, Session};
use crate::error::CliError;

pub async fn run_note_add(session: &Session, title: &str, body: &str) -> Result<LocalId, CliError> {
    let note = Note::new(title.trim(), body.trim());
    if note.is_empty() {
        return Err(CliError::EmptyContent);
    }

    let record = session.intents().insert(session.owner(), note).await?;
    println!("{}", record.local_id);
    Ok(record.local_id)
}

pub async fn run_note_edit(
    session: &Session,
    id: &str,
    title: Option<&str>,
    body: Option<&str>,
) -> Result<LocalId, CliError> {
    if title.is_none() && body.is_none() {
        return Err(CliError::NothingToEdit);
    }
    let record = require_record::<Note>(session, id).await?;

    let mut edited = record.payload.clone();
    if let Some(title) = title {
        edited.title = title.trim().to_string();
    }
    if let Some(body) = body {
        edited.body = body.trim().to_string();
    }

    if edited == record.payload {
        println!("{}", record.local_id);
        return Ok(record.local_id);
    }
    if edited.is_empty() {
        return Err(CliError::EmptyContent);
    }

    let updated = session
        .intents()
        .update(session.owner(), &record.local_id, edited)
        .await?;
    println!("{}", updated.local_id);
    Ok(updated.local_id)
}
