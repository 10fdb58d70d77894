use stow_core::{LocalId, Task};

use crate::commands::common::{normalize_content, require_record, Session};
use crate::error::CliError;

pub async fn run_task_add(session: &Session, text_parts: &[String]) -> Result<LocalId, CliError> {
    let text = normalize_content(&text_parts.join(" ")).ok_or(CliError::EmptyContent)?;

    let record = session.intents().insert(session.owner(), Task::new(text)).await?;
    println!("{}", record.local_id);
    Ok(record.local_id)
}

pub async fn run_task_edit(
    session: &Session,
    id: &str,
    text_parts: &[String],
) -> Result<LocalId, CliError> {
    let text = normalize_content(&text_parts.join(" ")).ok_or(CliError::EmptyContent)?;
    let record = require_record::<Task>(session, id).await?;

    let edited = Task {
        text,
        ..record.payload.clone()
    };
    save_task(session, record.local_id, &record.payload, edited).await
}

pub async fn run_task_done(session: &Session, id: &str, undo: bool) -> Result<LocalId, CliError> {
    let record = require_record::<Task>(session, id).await?;
    let edited = record.payload.clone().completed(!undo);
    save_task(session, record.local_id, &record.payload, edited).await
}

async fn save_task(
    session: &Session,
    local_id: LocalId,
    current: &Task,
    edited: Task,
) -> Result<LocalId, CliError> {
    if &edited != current {
        session
            .intents()
            .update(session.owner(), &local_id, edited)
            .await?;
    }
    println!("{local_id}");
    Ok(local_id)
}
