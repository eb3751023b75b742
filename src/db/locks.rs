//! Lock manager: at most one active lock per task, held on the task row.
//!
//! Locks are the `locked_by`/`lock_acquired_at` columns of the task itself,
//! so taking or dropping one is an ordinary version-guarded row update.

use super::Unit;
use super::history::last_entry_of;
use super::transitions::{apply, unlocked};
use crate::config::LockingConfig;
use crate::error::{TaskError, TaskResult};
use crate::state_machine::{lock_action, lock_predecessors};
use crate::types::{Action, Task, TaskState};
use tracing::info;

/// Whether the task's lock is older than the configured TTL.
pub fn is_stale(task: &Task, locking: &LockingConfig, now: i64) -> bool {
    task.lock_age_ms(now)
        .is_some_and(|age| age > locking.ttl_ms())
}

/// Take a lock of kind `target` for `actor`.
///
/// Locks are not re-entrant: asking again for a lock one already holds fails
/// with `AlreadyLocked`. A stale lock of the same kind held by someone else
/// is released first when the policy allows it.
///
/// Locking a `VALIDATED` task for validation re-opens it and needs
/// `may_reopen`. The check runs on the state after any reclaim, so a stale
/// re-open lock cannot be picked up by an unprivileged validator.
pub(crate) fn acquire(
    unit: &mut Unit<'_>,
    task: &Task,
    actor: &str,
    target: TaskState,
    locking: &LockingConfig,
    may_reopen: bool,
) -> TaskResult<Task> {
    let action = lock_action(target)
        .ok_or_else(|| TaskError::internal(format!("{target} is not a lock state")))?;

    if task.state.is_terminal() {
        return Err(TaskError::invalid_state(task.task_id, task.state, action));
    }

    let mut current = task.clone();
    if let Some(holder) = task.locked_by.as_deref() {
        let reclaimable = holder != actor
            && locking.reclaim_stale_locks
            && task.state == target
            && is_stale(task, locking, unit.now());
        if !reclaimable {
            return Err(TaskError::AlreadyLocked {
                task_id: task.task_id,
                holder: holder.to_string(),
            });
        }

        info!(
            project_id = task.project_id,
            task_id = task.task_id,
            holder,
            actor,
            "Reclaiming stale lock"
        );
        let comment = format!("stale lock held by {holder} released");
        current = force_release(unit, task, actor, Some(&comment))?;
    }

    if target == TaskState::LockedForValidation
        && current.state == TaskState::Validated
        && !may_reopen
    {
        return Err(TaskError::forbidden(format!(
            "re-opening validated task {} requires a project manager",
            current.task_id
        )));
    }

    if !lock_predecessors(target).contains(&current.state) {
        return Err(TaskError::invalid_state(current.task_id, current.state, action));
    }

    let next = Task {
        state: target,
        locked_by: Some(actor.to_string()),
        lock_acquired_at: Some(unit.now()),
        ..current.clone()
    };
    apply(unit, &current, next, action, actor, None)
}

/// Release a lock held by `actor`, moving the task to `resulting_state`.
///
/// Only the holder may release. `action` names the transition being
/// recorded and decides which completion column is stamped.
pub(crate) fn release(
    unit: &mut Unit<'_>,
    task: &Task,
    actor: &str,
    action: Action,
    resulting_state: TaskState,
    comment: Option<&str>,
) -> TaskResult<Task> {
    check_holder(task, actor)?;

    let mut next = unlocked(task);
    next.state = resulting_state;
    match action {
        Action::MarkMapped | Action::MarkBadImagery => next.mapped_by = Some(actor.to_string()),
        Action::Validate | Action::Invalidate => next.validated_by = Some(actor.to_string()),
        _ => {}
    }
    apply(unit, task, next, action, actor, comment)
}

/// Fail unless `actor` holds the task's lock; returns the holder.
pub(crate) fn check_holder<'t>(task: &'t Task, actor: &str) -> TaskResult<&'t str> {
    match task.locked_by.as_deref() {
        None => Err(TaskError::NotLocked {
            task_id: task.task_id,
        }),
        Some(holder) if holder != actor => Err(TaskError::NotLockHolder {
            task_id: task.task_id,
            holder: holder.to_string(),
            actor: actor.to_string(),
        }),
        Some(holder) => Ok(holder),
    }
}

/// Clear a lock regardless of its holder. Recorded as `force_unlock` so
/// forced releases are distinguishable from voluntary ones. Permission checks
/// belong to the caller.
pub(crate) fn force_release(
    unit: &mut Unit<'_>,
    task: &Task,
    actor: &str,
    comment: Option<&str>,
) -> TaskResult<Task> {
    if task.locked_by.is_none() {
        return Err(TaskError::NotLocked {
            task_id: task.task_id,
        });
    }

    let mut next = unlocked(task);
    next.state = unlock_target(unit, task)?;
    apply(unit, task, next, Action::ForceUnlock, actor, comment)
}

/// State a task returns to when its lock is dropped without completing work.
///
/// Mapping locks fall back to `READY`. Validation locks return to whatever
/// the task was before the lock, which is `VALIDATED` after a re-open.
pub(crate) fn unlock_target(unit: &Unit<'_>, task: &Task) -> TaskResult<TaskState> {
    match task.state {
        TaskState::LockedForMapping => Ok(TaskState::Ready),
        TaskState::LockedForValidation => {
            let locked_from = last_entry_of(
                unit.conn(),
                task.project_id,
                task.task_id,
                Action::LockForValidation,
            )?
            .and_then(|entry| entry.previous_state);
            Ok(match locked_from {
                Some(TaskState::Validated) => TaskState::Validated,
                _ => TaskState::Mapped,
            })
        }
        other => Err(TaskError::internal(format!(
            "task {} in {other} has no lock to drop",
            task.task_id
        ))),
    }
}

/// Force a task back to `READY`, clearing any lock and completion stamps.
pub(crate) fn reset(
    unit: &mut Unit<'_>,
    task: &Task,
    actor: &str,
    comment: Option<&str>,
) -> TaskResult<Task> {
    let next = Task {
        state: TaskState::Ready,
        mapped_by: None,
        validated_by: None,
        ..unlocked(task)
    };
    apply(unit, task, next, Action::Reset, actor, comment)
}

/// Refresh the acquisition time of a lock held by `actor`.
///
/// Not a state transition: bumps the version but writes no history.
pub(crate) fn extend(unit: &mut Unit<'_>, task: &Task, actor: &str) -> TaskResult<Task> {
    check_holder(task, actor)?;

    let next = Task {
        lock_acquired_at: Some(unit.now()),
        version: task.version + 1,
        updated_at: unit.now(),
        ..task.clone()
    };
    super::tasks::write_guarded(unit.conn(), task, &next)?;
    Ok(next)
}
