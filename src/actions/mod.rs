//! Task actions: the operations a request handler calls.
//!
//! Each operation runs as one transaction against the task store. History
//! entries written by the transaction are published to the notification sink
//! only after it commits.

mod admin;
mod bulk;
mod mapping;
mod split;
mod undo;
mod validation;

use crate::collaborators::{
    GeometryService, NotificationSink, StaticDirectory, TileSplitter, TracingSink, UserDirectory,
};
use crate::config::{Config, LockingConfig};
use crate::db::tasks::require_task;
use crate::db::{Database, Unit};
use crate::error::{TaskError, TaskResult};
use crate::types::{HistoryEntry, ProjectId, Role, Task, TaskId, TaskState};
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for every state-changing task operation.
///
/// Cheap to clone; clones share the database handle and collaborators, so
/// one manager can be handed to many request workers.
#[derive(Clone)]
pub struct TaskManager {
    db: Database,
    locking: LockingConfig,
    users: Arc<dyn UserDirectory>,
    geometry: Arc<dyn GeometryService>,
    notifier: Arc<dyn NotificationSink>,
}

impl TaskManager {
    /// Create a manager with default locking policy, tile splitting and
    /// tracing notifications.
    pub fn new(db: Database, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            db,
            locking: LockingConfig::default(),
            users,
            geometry: Arc::new(TileSplitter::default()),
            notifier: Arc::new(TracingSink),
        }
    }

    /// Create a manager whose locking policy and user table come from config.
    pub fn from_config(db: Database, config: &Config) -> Self {
        let users = Arc::new(StaticDirectory::from(&config.users));
        Self::new(db, users).with_locking(config.locking.clone())
    }

    pub fn with_locking(mut self, locking: LockingConfig) -> Self {
        self.locking = locking;
        self
    }

    pub fn with_geometry(mut self, geometry: Arc<dyn GeometryService>) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn locking(&self) -> &LockingConfig {
        &self.locking
    }

    /// Fetch a task or fail with `NotFound`.
    pub fn get_task(&self, project_id: ProjectId, task_id: TaskId) -> TaskResult<Task> {
        self.db
            .get_task(project_id, task_id)?
            .ok_or_else(|| TaskError::task_not_found(project_id, task_id))
    }

    pub fn list_tasks(&self, project_id: ProjectId, state: Option<TaskState>) -> TaskResult<Vec<Task>> {
        self.db.list_tasks(project_id, state)
    }

    pub fn task_history(&self, project_id: ProjectId, task_id: TaskId) -> TaskResult<Vec<HistoryEntry>> {
        self.db.task_history(project_id, task_id)
    }

    /// Resolve an actor's role; unknown actors are refused.
    fn role(&self, actor: &str) -> TaskResult<Role> {
        self.users
            .role(actor)
            .ok_or_else(|| TaskError::forbidden(format!("unknown user '{actor}'")))
    }

    fn require_privileged(&self, actor: &str, operation: &str) -> TaskResult<Role> {
        let role = self.role(actor)?;
        if !role.is_privileged() {
            warn!(actor, role = role.as_str(), operation, "Privileged operation refused");
            return Err(TaskError::forbidden(format!(
                "{operation} requires a project manager, {actor} is a {}",
                role.as_str()
            )));
        }
        Ok(role)
    }

    /// Run `f` in one transaction and publish what it recorded.
    fn commit<T, F>(&self, f: F) -> TaskResult<T>
    where
        F: FnOnce(&mut Unit<'_>) -> TaskResult<T>,
    {
        let (value, entries) = self.db.with_tx(f)?;
        self.publish(&entries);
        Ok(value)
    }

    fn publish(&self, entries: &[HistoryEntry]) {
        for entry in entries {
            if let Err(err) = self.notifier.notify(entry) {
                warn!(
                    project_id = entry.project_id,
                    task_id = entry.task_id,
                    action = %entry.action,
                    error = %err,
                    "Notification delivery failed"
                );
            }
        }
    }

    /// Run a single-task transaction, logging its outcome.
    fn on_task<F>(
        &self,
        operation: &'static str,
        project_id: ProjectId,
        task_id: TaskId,
        actor: &str,
        f: F,
    ) -> TaskResult<Task>
    where
        F: FnOnce(&mut Unit<'_>, Task) -> TaskResult<Task>,
    {
        let result = self.commit(|unit| {
            let task = require_task(unit.conn(), project_id, task_id)?;
            f(unit, task)
        });
        match &result {
            Ok(task) => info!(
                project_id,
                task_id,
                actor,
                operation,
                state = %task.state,
                "Task updated"
            ),
            Err(err) => warn!(
                project_id,
                task_id,
                actor,
                operation,
                code = err.code().as_str(),
                error = %err,
                "Task operation refused"
            ),
        }
        result
    }

    /// Run a multi-task transaction that succeeds or fails as a whole.
    fn on_tasks<I, F>(
        &self,
        operation: &'static str,
        project_id: ProjectId,
        items: I,
        actor: &str,
        mut f: F,
    ) -> TaskResult<Vec<Task>>
    where
        I: IntoIterator,
        F: FnMut(&mut Unit<'_>, Task, I::Item) -> TaskResult<Task>,
        I::Item: TaskItem,
    {
        let result = self.commit(|unit| {
            let mut done = Vec::new();
            for item in items {
                let task = require_task(unit.conn(), project_id, item.task_id())?;
                done.push(f(unit, task, item)?);
            }
            Ok(done)
        });
        match &result {
            Ok(tasks) => info!(project_id, actor, operation, count = tasks.len(), "Tasks updated"),
            Err(err) => warn!(
                project_id,
                actor,
                operation,
                code = err.code().as_str(),
                error = %err,
                "Task operation refused"
            ),
        }
        result
    }
}

/// Anything naming a task inside a multi-task request.
trait TaskItem {
    fn task_id(&self) -> TaskId;
}

impl TaskItem for TaskId {
    fn task_id(&self) -> TaskId {
        *self
    }
}

impl TaskItem for &crate::types::ValidationOutcome {
    fn task_id(&self) -> TaskId {
        self.task_id
    }
}

/// Drop repeated task ids, keeping first occurrences in order.
fn unique_ids(task_ids: &[TaskId]) -> Vec<TaskId> {
    let mut seen = std::collections::HashSet::new();
    task_ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}
