//! tasking command-line entry point.
//!
//! Opens the configured database, runs one task operation as the acting user
//! and prints the result as JSON or markdown.

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tasking_core::cli::{ActivityArgs, Cli, Command, USER_ENV, UnlockValidationArgs};
use tasking_core::config::Config;
use tasking_core::db::Database;
use tasking_core::error::TaskError;
use tasking_core::format::{
    OutputFormat, format_activity_markdown, format_bulk_markdown, format_history_markdown,
    format_mapped_by_user_markdown, format_task_markdown, format_tasks_markdown, render,
};
use tasking_core::logging::{self, LogTarget};
use tasking_core::types::{
    ActivitySort, Project, TaskId, TaskState, UserTaskFilter, ValidationOutcome,
};
use tasking_core::TaskManager;
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load(path)
                .with_context(|| format!("failed to load configuration from {path}"))?;
            config.apply_env();
            config
        }
        None => Config::load_or_default(),
    };
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }

    let format = OutputFormat::from_str(&cli.format)
        .with_context(|| format!("unknown output format '{}'", cli.format))?;

    config.ensure_db_dir()?;
    debug!(path = %config.server.db_path.display(), "Opening database");
    let db = Database::open(&config.server.db_path)?;
    let manager = TaskManager::from_config(db, &config);

    match run(&manager, &cli, format) {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(err) => match err.downcast_ref::<TaskError>() {
            Some(task_err) => {
                let body = json!({
                    "error": {
                        "code": task_err.code(),
                        "message": task_err.to_string(),
                    }
                });
                eprintln!("{}", serde_json::to_string_pretty(&body)?);
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}

fn acting_user(cli: &Cli) -> Result<String> {
    cli.user
        .clone()
        .or_else(|| std::env::var(USER_ENV).ok())
        .with_context(|| format!("no acting user; pass --user or set {USER_ENV}"))
}

fn run(manager: &TaskManager, cli: &Cli, format: OutputFormat) -> Result<String> {
    let db = manager.database();

    match &cli.command {
        Command::CreateProject { name } => {
            let project = db.create_project(name)?;
            render(format, &project, |p: &Project| {
                format!("Created project {} ({})\n", p.id, p.name)
            })
        }
        Command::AddTask { project, geometry } => {
            let actor = acting_user(cli)?;
            let task = db.add_task(*project, geometry, &actor)?;
            render(format, &task, format_task_markdown)
        }
        Command::Show(t) => {
            let task = manager.get_task(t.project, t.task)?;
            render(format, &task, format_task_markdown)
        }
        Command::List { project, state } => {
            let tasks = manager.list_tasks(*project, *state)?;
            render(format, tasks.as_slice(), format_tasks_markdown)
        }
        Command::History(t) => {
            let entries = manager.task_history(t.project, t.task)?;
            render(format, entries.as_slice(), format_history_markdown)
        }
        Command::LockMapping(t) => {
            let task = manager.lock_for_mapping(t.project, t.task, &acting_user(cli)?)?;
            render(format, &task, format_task_markdown)
        }
        Command::StopMapping(t) => {
            let task = manager.stop_mapping(t.project, t.task, &acting_user(cli)?)?;
            render(format, &task, format_task_markdown)
        }
        Command::UnlockMapping(args) => {
            let task = manager.unlock_after_mapping(
                args.task.project,
                args.task.task,
                &acting_user(cli)?,
                args.state,
                args.comment.as_deref(),
            )?;
            render(format, &task, format_task_markdown)
        }
        Command::Undo(t) => {
            let task = manager.undo_last_action(t.project, t.task, &acting_user(cli)?)?;
            render(format, &task, format_task_markdown)
        }
        Command::LockValidation(list) => {
            let tasks = manager.lock_for_validation(list.project, &list.tasks, &acting_user(cli)?)?;
            render(format, tasks.as_slice(), format_tasks_markdown)
        }
        Command::StopValidation(list) => {
            let tasks = manager.stop_validation(list.project, &list.tasks, &acting_user(cli)?)?;
            render(format, tasks.as_slice(), format_tasks_markdown)
        }
        Command::UnlockValidation(args) => {
            let outcomes = validation_outcomes(args)?;
            let tasks =
                manager.unlock_after_validation(args.project, &outcomes, &acting_user(cli)?)?;
            render(format, tasks.as_slice(), format_tasks_markdown)
        }
        Command::ExtendLock(list) => {
            let tasks = manager.extend_lock(list.project, &list.tasks, &acting_user(cli)?)?;
            render(format, tasks.as_slice(), format_tasks_markdown)
        }
        Command::ForceUnlock(t) => {
            let task = manager.force_unlock(t.project, t.task, &acting_user(cli)?)?;
            render(format, &task, format_task_markdown)
        }
        Command::ReleaseStale(t) => {
            let task = manager.release_stale_lock(t.project, t.task, &acting_user(cli)?)?;
            render(format, &task, format_task_markdown)
        }
        Command::Bulk { project, action } => {
            let result = manager.apply_bulk(*project, (*action).into(), &acting_user(cli)?)?;
            render(format, &result, format_bulk_markdown)
        }
        Command::Split(t) => {
            let children = manager.split_task(t.project, t.task, &acting_user(cli)?)?;
            render(format, children.as_slice(), format_tasks_markdown)
        }
        Command::MyLocks => {
            let tasks = db.locked_tasks_for_user(&acting_user(cli)?)?;
            render(format, tasks.as_slice(), format_tasks_markdown)
        }
        Command::StaleLocks { project } => {
            let tasks = db.stale_locks(*project, manager.locking())?;
            render(format, tasks.as_slice(), format_tasks_markdown)
        }
        Command::MappedByUser { project } => {
            let groups = db.mapped_tasks_by_user(*project)?;
            render(format, groups.as_slice(), format_mapped_by_user_markdown)
        }
        Command::Invalidated { project } => {
            let tasks = db.invalidated_tasks_for_user(*project, &acting_user(cli)?)?;
            render(format, tasks.as_slice(), format_tasks_markdown)
        }
        Command::Activity(args) => {
            let activity = db.user_task_activity(&acting_user(cli)?, &activity_filter(args))?;
            render(format, activity.as_slice(), format_activity_markdown)
        }
    }
}

fn validation_outcomes(args: &UnlockValidationArgs) -> Result<Vec<ValidationOutcome>> {
    if args.validated.is_empty() && args.invalidated.is_empty() {
        bail!("nothing to unlock; pass --validated and/or --invalidated task ids");
    }

    let outcome = |task_id: TaskId, new_state: TaskState| ValidationOutcome {
        task_id,
        new_state,
        comment: args.comment.clone(),
    };
    let outcomes = args
        .validated
        .iter()
        .map(|&id| outcome(id, TaskState::Validated))
        .chain(
            args.invalidated
                .iter()
                .map(|&id| outcome(id, TaskState::Invalidated)),
        )
        .collect();
    Ok(outcomes)
}

fn activity_filter(args: &ActivityArgs) -> UserTaskFilter {
    UserTaskFilter {
        project_id: args.project,
        state: args.state,
        from: args.from,
        to: args.to,
        sort: if args.ascending {
            ActivitySort::ActionDate
        } else {
            ActivitySort::ActionDateDesc
        },
    }
}
