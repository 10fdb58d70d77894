use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use stow_core::RecordKind;

#[derive(Parser)]
#[command(name = "stow")]
#[command(about = "Offline-first notes, tasks, and focus timer")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Owner the records belong to (falls back to STOW_OWNER_ID)
    #[arg(long, global = true, value_name = "ID")]
    pub owner: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or edit notes
    #[command(subcommand)]
    Note(NoteCommand),
    /// Create, edit, or complete tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Focus timer configuration
    #[command(subcommand)]
    Timer(TimerCommand),
    /// List local records
    List {
        /// Only show one kind of record
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Only show records not yet in agreement with the remote service
        #[arg(long)]
        pending: bool,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record, remotely too once it was synced
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Push pending local changes to the remote service
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import records that exist only on the remote service
    Backfill,
    /// Show sync state counts and the last pass per kind
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum NoteCommand {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note title
        title: String,
        /// Note body
        #[arg(short, long, default_value = "")]
        body: String,
    },
    /// Edit an existing note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// Replacement title
        #[arg(short, long)]
        title: Option<String>,
        /// Replacement body
        #[arg(short, long)]
        body: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Create a new task
    #[command(alias = "new")]
    Add {
        /// Task text
        text: Vec<String>,
    },
    /// Change a task's text
    Edit {
        /// Task ID or unique ID prefix
        id: String,
        /// Replacement text
        text: Vec<String>,
    },
    /// Mark a task completed
    Done {
        /// Task ID or unique ID prefix
        id: String,
        /// Mark the task open again instead
        #[arg(long)]
        undo: bool,
    },
}

#[derive(Subcommand)]
pub enum TimerCommand {
    /// Create or change the focus timer configuration
    Set {
        /// Focus session length in minutes
        #[arg(long)]
        focus: Option<u32>,
        /// Short break length in minutes
        #[arg(long)]
        short_break: Option<u32>,
        /// Long break length in minutes
        #[arg(long)]
        long_break: Option<u32>,
        /// Focus sessions before a long break
        #[arg(long)]
        sessions: Option<u32>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Note,
    Task,
    Timer,
}

impl From<KindArg> for RecordKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Note => Self::Note,
            KindArg::Task => Self::Task,
            KindArg::Timer => Self::Timer,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
