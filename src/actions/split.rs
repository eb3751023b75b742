//! Replacing a task with smaller child tasks.

use super::TaskManager;
use crate::db::locks::check_holder;
use crate::db::tasks::{insert_task, require_task};
use crate::db::transitions::{apply, unlocked};
use crate::error::{TaskError, TaskResult};
use crate::types::{Action, ProjectId, Task, TaskId, TaskState};
use tracing::{info, warn};

/// A task may be split only by the actor mapping it.
fn check_splittable(task: &Task, actor: &str) -> TaskResult<()> {
    if task.state != TaskState::LockedForMapping {
        return Err(TaskError::invalid_state(task.task_id, task.state, Action::Split));
    }
    check_holder(task, actor)?;
    Ok(())
}

impl TaskManager {
    /// Split a task locked for mapping by `actor` into `READY` children.
    ///
    /// The parent moves to `SPLIT` with its lock cleared. Children, parent
    /// update and all history entries are written in one transaction. The
    /// geometry service runs before the transaction opens, and the parent
    /// write is conditioned on the snapshot it was computed from, so any
    /// change in between fails the split and leaves no children behind.
    pub fn split_task(&self, project_id: ProjectId, task_id: TaskId, actor: &str) -> TaskResult<Vec<Task>> {
        self.role(actor)?;

        let parent = self
            .db
            .with_conn(|conn| require_task(conn, project_id, task_id))?;
        check_splittable(&parent, actor)?;

        let parts = self
            .geometry
            .split_geometry(&parent.geometry_ref)
            .map_err(|err| TaskError::SplitFailed {
                task_id,
                cause: format!("{err:#}"),
            })?;
        if parts.len() < 2 {
            return Err(TaskError::SplitFailed {
                task_id,
                cause: format!("geometry service returned {} part(s)", parts.len()),
            });
        }

        let result = self.commit(|unit| {
            let comment = format!("split from task {task_id}");
            let children = parts
                .iter()
                .map(|part| insert_task(unit, project_id, part, Some(task_id), actor, Some(&comment)))
                .collect::<TaskResult<Vec<_>>>()?;

            let ids: Vec<String> = children.iter().map(|c| c.task_id.to_string()).collect();
            let next = Task {
                state: TaskState::Split,
                ..unlocked(&parent)
            };
            let comment = format!("split into tasks {}", ids.join(", "));
            apply(unit, &parent, next, Action::Split, actor, Some(&comment))?;
            Ok(children)
        });

        match result {
            Ok(children) => {
                info!(
                    project_id,
                    task_id,
                    actor,
                    children = children.len(),
                    "Task split"
                );
                Ok(children)
            }
            Err(err) => {
                warn!(project_id, task_id, actor, error = %err, "Split rolled back");
                Err(TaskError::SplitFailed {
                    task_id,
                    cause: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{GeometryService, StaticDirectory};
    use crate::db::Database;
    use crate::error::ErrorCode;
    use crate::types::Role;
    use anyhow::bail;
    use std::sync::Arc;

    struct Unsplittable;

    impl GeometryService for Unsplittable {
        fn split_geometry(&self, _geometry_ref: &str) -> anyhow::Result<Vec<String>> {
            bail!("geometry backend unavailable")
        }
    }

    fn setup() -> (TaskManager, ProjectId) {
        let db = Database::open_in_memory().unwrap();
        let project = db.create_project("split").unwrap();
        db.add_task(project.id, "12/100/200", "pm").unwrap();
        let users = StaticDirectory::new().with_default_role(Role::Mapper);
        (TaskManager::new(db, Arc::new(users)), project.id)
    }

    #[test]
    fn split_creates_ready_children() {
        let (tm, project) = setup();
        tm.lock_for_mapping(project, 1, "a").unwrap();

        let children = tm.split_task(project, 1, "a").unwrap();
        assert_eq!(children.len(), 4);
        assert!(children.iter().all(|c| c.state == TaskState::Ready));
        assert!(children.iter().all(|c| c.parent_task_id == Some(1)));
        assert_eq!(children[0].geometry_ref, "13/200/400");

        let parent = tm.get_task(project, 1).unwrap();
        assert_eq!(parent.state, TaskState::Split);
        assert!(parent.locked_by.is_none());

        let err = tm.lock_for_mapping(project, 1, "a").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn split_requires_own_mapping_lock() {
        let (tm, project) = setup();
        let err = tm.split_task(project, 1, "a").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);

        tm.lock_for_mapping(project, 1, "a").unwrap();
        let err = tm.split_task(project, 1, "b").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotLockHolder);
    }

    #[test]
    fn geometry_failure_is_split_failed() {
        let (tm, project) = setup();
        let tm = tm.with_geometry(Arc::new(Unsplittable));
        tm.lock_for_mapping(project, 1, "a").unwrap();

        let err = tm.split_task(project, 1, "a").unwrap_err();
        assert_eq!(err.code(), ErrorCode::SplitFailed);
        assert_eq!(tm.list_tasks(project, None).unwrap().len(), 1);
    }
}
