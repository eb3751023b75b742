//! The single write path for task state changes.

use super::Unit;
use super::history::{NewEntry, append_entry};
use super::tasks::write_guarded;
use crate::error::{TaskError, TaskResult};
use crate::state_machine;
use crate::types::{Action, Task};

/// Commit `next` as the successor of `current`.
///
/// Checks the edge against the transition table and the lock invariant,
/// bumps the version, writes the row conditioned on `current` and appends
/// the matching history entry, all on the unit's transaction.
pub(crate) fn apply(
    unit: &mut Unit<'_>,
    current: &Task,
    mut next: Task,
    action: Action,
    actor: &str,
    comment: Option<&str>,
) -> TaskResult<Task> {
    if !state_machine::permits(action, Some(current.state), next.state) {
        return Err(TaskError::invalid_state(current.task_id, current.state, action));
    }

    if next.locked_by.is_some() != next.state.is_locked()
        || next.lock_acquired_at.is_some() != next.locked_by.is_some()
    {
        return Err(TaskError::internal(format!(
            "lock fields of task {} disagree with state {}",
            current.task_id, next.state
        )));
    }

    next.version = current.version + 1;
    next.updated_at = unit.now();

    write_guarded(unit.conn(), current, &next)?;

    let entry = append_entry(
        unit.conn(),
        NewEntry {
            project_id: current.project_id,
            task_id: current.task_id,
            actor,
            action,
            previous_state: Some(current.state),
            new_state: next.state,
            comment,
            timestamp: unit.now(),
        },
    )?;
    unit.push_entry(entry);

    Ok(next)
}

/// `task` with its lock fields cleared.
pub(crate) fn unlocked(task: &Task) -> Task {
    Task {
        locked_by: None,
        lock_acquired_at: None,
        ..task.clone()
    }
}
