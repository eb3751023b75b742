//! Project-wide actions applied one task per transaction.
//!
//! A failing task never aborts the batch and nothing is held across the
//! whole project, so single-task requests may interleave with a bulk pass.

use super::TaskManager;
use crate::db::locks;
use crate::db::tasks::require_task;
use crate::db::Unit;
use crate::error::TaskResult;
use crate::types::{
    Action, BulkAction, BulkActionResult, BulkOutcome, ProjectId, SkipReason, Task, TaskId,
    TaskState,
};
use tracing::{debug, info};

impl TaskManager {
    /// Apply `action` to every task of the project its filter selects.
    ///
    /// Returns an outcome for each selected task; `reset_all` selects every
    /// task of the project. Only a missing project or a refused actor fails
    /// the call as a whole.
    pub fn apply_bulk(
        &self,
        project_id: ProjectId,
        action: BulkAction,
        actor: &str,
    ) -> TaskResult<BulkActionResult> {
        self.require_privileged(actor, action.as_str())?;

        let candidates: Vec<TaskId> = self
            .db
            .list_tasks(project_id, None)?
            .into_iter()
            .filter(|task| action.selects(task.state))
            .map(|task| task.task_id)
            .collect();

        let mut result = BulkActionResult::new(action);
        for task_id in candidates {
            let outcome = self
                .commit(|unit| self.bulk_step(unit, project_id, task_id, action, actor))
                .unwrap_or_else(|err| BulkOutcome::Failed(err.short_reason()));
            debug!(project_id, task_id, action = action.as_str(), %outcome, "Bulk step");
            result.record(task_id, outcome);
        }

        info!(
            project_id,
            actor,
            action = action.as_str(),
            selected = result.outcomes.len(),
            applied = result.applied_count(),
            "Bulk action finished"
        );
        Ok(result)
    }

    pub fn bulk_map_all(&self, project_id: ProjectId, actor: &str) -> TaskResult<BulkActionResult> {
        self.apply_bulk(project_id, BulkAction::MapAll, actor)
    }

    pub fn bulk_validate_all(&self, project_id: ProjectId, actor: &str) -> TaskResult<BulkActionResult> {
        self.apply_bulk(project_id, BulkAction::ValidateAll, actor)
    }

    pub fn bulk_invalidate_all(&self, project_id: ProjectId, actor: &str) -> TaskResult<BulkActionResult> {
        self.apply_bulk(project_id, BulkAction::InvalidateAll, actor)
    }

    pub fn bulk_reset_bad_imagery(&self, project_id: ProjectId, actor: &str) -> TaskResult<BulkActionResult> {
        self.apply_bulk(project_id, BulkAction::ResetBadImagery, actor)
    }

    pub fn bulk_reset_all(&self, project_id: ProjectId, actor: &str) -> TaskResult<BulkActionResult> {
        self.apply_bulk(project_id, BulkAction::ResetAll, actor)
    }

    /// One task of a bulk pass. The task is re-read inside the transaction,
    /// so a state change since selection shows up as a skip.
    fn bulk_step(
        &self,
        unit: &mut Unit<'_>,
        project_id: ProjectId,
        task_id: TaskId,
        action: BulkAction,
        actor: &str,
    ) -> TaskResult<BulkOutcome> {
        let task = require_task(unit.conn(), project_id, task_id)?;
        if !action.selects(task.state) {
            return Ok(BulkOutcome::Skipped(SkipReason::StateChanged));
        }
        match task.state {
            TaskState::Ready if action == BulkAction::ResetAll => {
                return Ok(BulkOutcome::Skipped(SkipReason::AlreadyReady));
            }
            TaskState::Split => return Ok(BulkOutcome::Skipped(SkipReason::Terminal)),
            _ => {}
        }

        // Resets override whoever holds the lock.
        if !action.is_forced() && task.locked_by.as_deref().is_some_and(|holder| holder != actor) {
            return Ok(BulkOutcome::Skipped(SkipReason::Locked));
        }

        let comment = Some(action.as_str());
        match action {
            BulkAction::MapAll => {
                let locked = self.locked_as(unit, task, actor, TaskState::LockedForMapping)?;
                locks::release(unit, &locked, actor, Action::MarkMapped, TaskState::Mapped, comment)?;
            }
            BulkAction::ValidateAll => {
                let locked = self.locked_as(unit, task, actor, TaskState::LockedForValidation)?;
                locks::release(unit, &locked, actor, Action::Validate, TaskState::Validated, comment)?;
            }
            BulkAction::InvalidateAll => {
                let locked = self.locked_as(unit, task, actor, TaskState::LockedForValidation)?;
                locks::release(
                    unit,
                    &locked,
                    actor,
                    Action::Invalidate,
                    TaskState::Invalidated,
                    comment,
                )?;
            }
            BulkAction::ResetBadImagery | BulkAction::ResetAll => {
                locks::reset(unit, &task, actor, comment)?;
            }
        }
        Ok(BulkOutcome::Applied)
    }

    /// `task` locked by `actor` in `target`, taking the lock if needed.
    fn locked_as(
        &self,
        unit: &mut Unit<'_>,
        task: Task,
        actor: &str,
        target: TaskState,
    ) -> TaskResult<Task> {
        if task.state == target {
            Ok(task)
        } else {
            locks::acquire(unit, &task, actor, target, &self.locking, true)
        }
    }
}
