//! Mapping locks: take a task, give it back, or finish it.

use super::TaskManager;
use crate::db::locks;
use crate::error::{TaskError, TaskResult};
use crate::state_machine::mapping_release_action;
use crate::types::{Action, ProjectId, Task, TaskId, TaskState};

impl TaskManager {
    /// Lock a `READY` or `INVALIDATED` task for mapping.
    pub fn lock_for_mapping(&self, project_id: ProjectId, task_id: TaskId, actor: &str) -> TaskResult<Task> {
        self.role(actor)?;
        let locking = &self.locking;
        self.on_task("lock_for_mapping", project_id, task_id, actor, |unit, task| {
            locks::acquire(unit, &task, actor, TaskState::LockedForMapping, locking, false)
        })
    }

    /// Give up a mapping lock without finishing; the task returns to `READY`.
    pub fn stop_mapping(&self, project_id: ProjectId, task_id: TaskId, actor: &str) -> TaskResult<Task> {
        self.role(actor)?;
        self.on_task("stop_mapping", project_id, task_id, actor, |unit, task| {
            locks::release(unit, &task, actor, Action::StopMapping, TaskState::Ready, None)
        })
    }

    /// Finish mapping, moving the task to `MAPPED` or `BADIMAGERY`.
    pub fn unlock_after_mapping(
        &self,
        project_id: ProjectId,
        task_id: TaskId,
        actor: &str,
        new_state: TaskState,
        comment: Option<&str>,
    ) -> TaskResult<Task> {
        self.role(actor)?;
        self.on_task("unlock_after_mapping", project_id, task_id, actor, |unit, task| {
            let action = mapping_release_action(new_state)
                .ok_or_else(|| TaskError::invalid_state(task.task_id, task.state, Action::MarkMapped))?;
            locks::release(unit, &task, actor, action, new_state, comment)
        })
    }
}
