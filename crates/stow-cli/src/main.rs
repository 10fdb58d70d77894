//! stow - offline-first notes, tasks, and focus timer from the command line

mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, NoteCommand, TaskCommand, TimerCommand};
use crate::commands::common::{open_session, resolve_db_path, resolve_owner, Session};
use crate::commands::completions::run_completions;
use crate::commands::delete::run_delete;
use crate::commands::list::run_list;
use crate::commands::note::{run_note_add, run_note_edit};
use crate::commands::status::run_status;
use crate::commands::sync::{run_backfill, run_sync};
use crate::commands::task::{run_task_add, run_task_done, run_task_edit};
use crate::commands::timer::{run_timer_set, TimerChanges};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    if let Commands::Completions { shell, output } = &command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path);
    let owner = resolve_owner(cli.owner)?;
    let session = open_session(&db_path, owner).await?;

    let result = dispatch(&session, command).await;
    session.close().await;
    result
}

async fn dispatch(session: &Session, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Note(NoteCommand::Add { title, body }) => {
            run_note_add(session, &title, &body).await?;
        }
        Commands::Note(NoteCommand::Edit { id, title, body }) => {
            run_note_edit(session, &id, title.as_deref(), body.as_deref()).await?;
        }
        Commands::Task(TaskCommand::Add { text }) => {
            run_task_add(session, &text).await?;
        }
        Commands::Task(TaskCommand::Edit { id, text }) => {
            run_task_edit(session, &id, &text).await?;
        }
        Commands::Task(TaskCommand::Done { id, undo }) => {
            run_task_done(session, &id, undo).await?;
        }
        Commands::Timer(TimerCommand::Set {
            focus,
            short_break,
            long_break,
            sessions,
        }) => {
            let changes = TimerChanges {
                focus_minutes: focus,
                short_break_minutes: short_break,
                long_break_minutes: long_break,
                sessions_before_long_break: sessions,
            };
            run_timer_set(session, changes).await?;
        }
        Commands::List {
            kind,
            pending,
            limit,
            json,
        } => {
            run_list(session, kind.map(Into::into), pending, limit, json).await?;
        }
        Commands::Delete { id } => {
            run_delete(session, &id).await?;
        }
        Commands::Sync { json } => {
            run_sync(session, json).await?;
        }
        Commands::Backfill => {
            run_backfill(session).await?;
        }
        Commands::Status { json } => {
            run_status(session, json).await?;
        }
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }
    Ok(())
}
