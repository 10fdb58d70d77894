use stow_core::{DeleteOutcome, Note, RecordKind, Task, TimerConfig};
use tracing::debug;

use crate::commands::common::{resolve_record, Session};
use crate::error::CliError;

pub async fn run_delete(session: &Session, id: &str) -> Result<DeleteOutcome, CliError> {
    let (kind, local_id) = resolve_record(session, id).await?;
    let intents = session.intents();
    let owner = session.owner();

    let outcome = match kind {
        RecordKind::Note => intents.delete::<Note>(owner, &local_id).await?,
        RecordKind::Task => intents.delete::<Task>(owner, &local_id).await?,
        RecordKind::Timer => intents.delete::<TimerConfig>(owner, &local_id).await?,
    };
    debug!(%local_id, %kind, ?outcome, "delete applied");

    println!("{local_id}");
    Ok(outcome)
}
