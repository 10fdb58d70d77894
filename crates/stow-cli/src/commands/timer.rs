use stow_core::db::RecordStore;
use stow_core::{LocalId, TimerConfig};

use crate::commands::common::Session;
use crate::error::CliError;

/// Fields given on the command line; `None` keeps the current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerChanges {
    pub focus_minutes: Option<u32>,
    pub short_break_minutes: Option<u32>,
    pub long_break_minutes: Option<u32>,
    pub sessions_before_long_break: Option<u32>,
}

impl TimerChanges {
    pub fn apply(self, config: TimerConfig) -> TimerConfig {
        TimerConfig {
            focus_minutes: self.focus_minutes.unwrap_or(config.focus_minutes),
            short_break_minutes: self
                .short_break_minutes
                .unwrap_or(config.short_break_minutes),
            long_break_minutes: self.long_break_minutes.unwrap_or(config.long_break_minutes),
            sessions_before_long_break: self
                .sessions_before_long_break
                .unwrap_or(config.sessions_before_long_break),
        }
    }
}

/// Update the owner's timer configuration, creating it from defaults when missing
pub async fn run_timer_set(session: &Session, changes: TimerChanges) -> Result<LocalId, CliError> {
    let current = session
        .store()
        .list_all::<TimerConfig>(session.owner())
        .await?
        .into_iter()
        .filter(|record| !record.state.flags().tombstoned)
        .max_by_key(|record| record.updated_at);

    let local_id = match current {
        Some(record) => {
            let edited = changes.apply(record.payload);
            if edited != record.payload {
                session
                    .intents()
                    .update(session.owner(), &record.local_id, edited)
                    .await?;
            }
            record.local_id
        }
        None => {
            let config = changes.apply(TimerConfig::default());
            session
                .intents()
                .insert(session.owner(), config)
                .await?
                .local_id
        }
    };

    println!("{local_id}");
    Ok(local_id)
}
