//! CLI command definitions for tasking
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use crate::types::{BulkAction, ProjectId, TaskId, TaskState};
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Environment variable naming the acting user when `--user` is absent.
pub const USER_ENV: &str = "TASKING_USER";

/// Task locking and validation workflow for mapping projects
#[derive(Parser, Debug)]
#[command(name = "tasking", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Acting user (defaults to $TASKING_USER)
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    /// Output format: json (default) or markdown
    #[arg(short, long, default_value = "json", global = true)]
    pub format: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a project
    CreateProject {
        /// Project name
        name: String,
    },

    /// Add a READY task to a project
    AddTask {
        project: ProjectId,
        /// Geometry reference, e.g. a z/x/y tile
        geometry: String,
    },

    /// Show one task
    Show(TaskRef),

    /// List a project's tasks
    List {
        project: ProjectId,
        /// Only tasks in this state
        #[arg(long)]
        state: Option<TaskState>,
    },

    /// Show a task's history
    History(TaskRef),

    /// Lock a task for mapping
    LockMapping(TaskRef),

    /// Release a mapping lock without finishing
    StopMapping(TaskRef),

    /// Finish mapping a task
    UnlockMapping(UnlockMappingArgs),

    /// Undo your last action on a task
    Undo(TaskRef),

    /// Lock tasks for validation
    LockValidation(TaskList),

    /// Release validation locks without finishing
    StopValidation(TaskList),

    /// Finish validating tasks
    UnlockValidation(UnlockValidationArgs),

    /// Refresh your locks so they do not go stale
    ExtendLock(TaskList),

    /// Release any lock (project managers only)
    ForceUnlock(TaskRef),

    /// Release a lock older than the configured TTL
    ReleaseStale(TaskRef),

    /// Apply an action to every matching task of a project
    Bulk {
        project: ProjectId,
        #[arg(value_enum)]
        action: BulkCommand,
    },

    /// Split a task you are mapping into smaller tasks
    Split(TaskRef),

    /// List tasks locked by the acting user
    MyLocks,

    /// List locks older than the configured TTL
    StaleLocks { project: ProjectId },

    /// Group a project's mapped tasks by mapper
    MappedByUser { project: ProjectId },

    /// List the acting user's tasks that came back invalidated
    Invalidated { project: ProjectId },

    /// List tasks the acting user has worked on
    Activity(ActivityArgs),
}

/// A single task.
#[derive(Args, Debug, Clone, Copy)]
pub struct TaskRef {
    pub project: ProjectId,
    pub task: TaskId,
}

/// Several tasks of one project.
#[derive(Args, Debug, Clone)]
pub struct TaskList {
    pub project: ProjectId,
    #[arg(required = true, num_args = 1..)]
    pub tasks: Vec<TaskId>,
}

#[derive(Args, Debug)]
pub struct UnlockMappingArgs {
    #[command(flatten)]
    pub task: TaskRef,

    /// Resulting state: MAPPED or BADIMAGERY
    #[arg(long, default_value = "MAPPED")]
    pub state: TaskState,

    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Args, Debug)]
pub struct UnlockValidationArgs {
    pub project: ProjectId,

    /// Tasks to mark VALIDATED
    #[arg(long, num_args = 1..)]
    pub validated: Vec<TaskId>,

    /// Tasks to mark INVALIDATED
    #[arg(long, num_args = 1..)]
    pub invalidated: Vec<TaskId>,

    /// Comment recorded on every task
    #[arg(long)]
    pub comment: Option<String>,
}

#[derive(Args, Debug)]
pub struct ActivityArgs {
    #[arg(long)]
    pub project: Option<ProjectId>,

    /// Current state of the task
    #[arg(long)]
    pub state: Option<TaskState>,

    /// Earliest action time, epoch milliseconds
    #[arg(long)]
    pub from: Option<i64>,

    /// Latest action time, epoch milliseconds
    #[arg(long)]
    pub to: Option<i64>,

    /// Oldest first instead of newest first
    #[arg(long)]
    pub ascending: bool,
}

/// Bulk actions as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BulkCommand {
    MapAll,
    ValidateAll,
    InvalidateAll,
    ResetBadImagery,
    ResetAll,
}

impl From<BulkCommand> for BulkAction {
    fn from(command: BulkCommand) -> Self {
        match command {
            BulkCommand::MapAll => BulkAction::MapAll,
            BulkCommand::ValidateAll => BulkAction::ValidateAll,
            BulkCommand::InvalidateAll => BulkAction::InvalidateAll,
            BulkCommand::ResetBadImagery => BulkAction::ResetBadImagery,
            BulkCommand::ResetAll => BulkAction::ResetAll,
        }
    }
}
