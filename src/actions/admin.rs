//! Lock housekeeping: forced release, stale locks and lock renewal.

use super::{TaskManager, unique_ids};
use crate::db::locks;
use crate::error::{TaskError, TaskResult};
use crate::types::{ProjectId, Task, TaskId};

impl TaskManager {
    /// Release any lock regardless of holder. Project managers only.
    pub fn force_unlock(&self, project_id: ProjectId, task_id: TaskId, actor: &str) -> TaskResult<Task> {
        self.require_privileged(actor, "force_unlock")?;
        self.on_task("force_unlock", project_id, task_id, actor, |unit, task| {
            let comment = format!("released by {actor}");
            locks::force_release(unit, &task, actor, Some(&comment))
        })
    }

    /// Release a lock that has outlived the TTL. Any known user may do this;
    /// a lock that is still fresh is reported as `AlreadyLocked`.
    pub fn release_stale_lock(&self, project_id: ProjectId, task_id: TaskId, actor: &str) -> TaskResult<Task> {
        self.role(actor)?;
        let locking = &self.locking;
        self.on_task("release_stale_lock", project_id, task_id, actor, |unit, task| {
            let Some(holder) = task.locked_by.as_deref() else {
                return Err(TaskError::NotLocked { task_id });
            };
            if !locks::is_stale(&task, locking, unit.now()) {
                return Err(TaskError::AlreadyLocked {
                    task_id,
                    holder: holder.to_string(),
                });
            }
            let comment = format!("stale lock held by {holder} released");
            locks::force_release(unit, &task, actor, Some(&comment))
        })
    }

    /// Renew the actor's own locks so they do not go stale.
    pub fn extend_lock(&self, project_id: ProjectId, task_ids: &[TaskId], actor: &str) -> TaskResult<Vec<Task>> {
        self.role(actor)?;
        self.on_tasks("extend_lock", project_id, unique_ids(task_ids), actor, |unit, task, _| {
            locks::extend(unit, &task, actor)
        })
    }
}
