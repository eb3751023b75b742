//! One-level undo of a user's own last action.

use super::TaskManager;
use crate::db::history::last_entry;
use crate::db::transitions::{apply, unlocked};
use crate::error::{TaskError, TaskResult};
use crate::types::{Action, ProjectId, Task, TaskId};

impl TaskManager {
    /// Revert the task's most recent history entry.
    ///
    /// Only the actor who made that entry may undo it, and only while no one
    /// else holds the task's lock. The original entry stays in the ledger; the
    /// reversal is recorded as a new `undo` entry. Undoing into a lock state
    /// hands the lock back to the actor.
    pub fn undo_last_action(&self, project_id: ProjectId, task_id: TaskId, actor: &str) -> TaskResult<Task> {
        self.role(actor)?;
        self.on_task("undo_last_action", project_id, task_id, actor, |unit, task| {
            let entry = last_entry(unit.conn(), project_id, task_id)?
                .filter(|entry| entry.action.is_reversible())
                .ok_or(TaskError::NothingToUndo { task_id })?;
            let restored = entry
                .previous_state
                .ok_or(TaskError::NothingToUndo { task_id })?;

            if entry.actor != actor {
                return Err(TaskError::forbidden(format!(
                    "last action on task {task_id} was made by {}",
                    entry.actor
                )));
            }
            if let Some(holder) = task.locked_by.as_deref()
                && holder != actor
            {
                return Err(TaskError::forbidden(format!(
                    "task {task_id} is locked by {holder}"
                )));
            }

            let mut next = unlocked(&task);
            next.state = restored;
            if restored.is_locked() {
                next.locked_by = Some(actor.to_string());
                next.lock_acquired_at = Some(unit.now());
            }
            match entry.action {
                Action::MarkMapped | Action::MarkBadImagery => next.mapped_by = None,
                Action::Validate | Action::Invalidate => next.validated_by = None,
                _ => {}
            }

            let comment = format!("undo {}", entry.action);
            apply(unit, &task, next, Action::Undo, actor, Some(&comment))
        })
    }
}
