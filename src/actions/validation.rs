//! Validation locks over lists of tasks. Every list operation is
//! all-or-nothing: one refused task leaves the whole list untouched.

use super::{TaskManager, unique_ids};
use crate::db::locks;
use crate::error::{TaskError, TaskResult};
use crate::state_machine::validation_release_action;
use crate::types::{Action, ProjectId, Task, TaskId, TaskState, ValidationOutcome};

impl TaskManager {
    /// Lock `MAPPED` tasks for validation.
    ///
    /// Project managers may also lock `VALIDATED` tasks to re-open them.
    pub fn lock_for_validation(
        &self,
        project_id: ProjectId,
        task_ids: &[TaskId],
        actor: &str,
    ) -> TaskResult<Vec<Task>> {
        let may_reopen = self.role(actor)?.is_privileged();
        let locking = &self.locking;
        self.on_tasks("lock_for_validation", project_id, unique_ids(task_ids), actor, |unit, task, _| {
            locks::acquire(
                unit,
                &task,
                actor,
                TaskState::LockedForValidation,
                locking,
                may_reopen,
            )
        })
    }

    /// Give up validation locks. Each task returns to the state it was
    /// locked from.
    pub fn stop_validation(
        &self,
        project_id: ProjectId,
        task_ids: &[TaskId],
        actor: &str,
    ) -> TaskResult<Vec<Task>> {
        self.role(actor)?;
        self.on_tasks("stop_validation", project_id, unique_ids(task_ids), actor, |unit, task, _| {
            locks::check_holder(&task, actor)?;
            if task.state != TaskState::LockedForValidation {
                return Err(TaskError::invalid_state(
                    task.task_id,
                    task.state,
                    Action::StopValidation,
                ));
            }
            let target = locks::unlock_target(unit, &task)?;
            locks::release(unit, &task, actor, Action::StopValidation, target, None)
        })
    }

    /// Finish validation, moving each task to its requested `VALIDATED` or
    /// `INVALIDATED` state.
    pub fn unlock_after_validation(
        &self,
        project_id: ProjectId,
        outcomes: &[ValidationOutcome],
        actor: &str,
    ) -> TaskResult<Vec<Task>> {
        self.role(actor)?;
        self.on_tasks("unlock_after_validation", project_id, outcomes, actor, |unit, task, outcome| {
            let action = validation_release_action(outcome.new_state).ok_or_else(|| {
                TaskError::invalid_state(task.task_id, task.state, Action::Validate)
            })?;
            locks::release(
                unit,
                &task,
                actor,
                action,
                outcome.new_state,
                outcome.comment.as_deref(),
            )
        })
    }
}
