//! Structured error types for task operations.

use crate::types::{Action, ProjectId, TaskId, TaskState};
use serde::Serialize;

/// Error codes for programmatic error handling by the REST layer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Not found errors
    NotFound,

    // Transition errors
    InvalidState,

    // Lock ownership errors
    AlreadyLocked,
    NotLocked,
    NotLockHolder,

    // Concurrency
    Conflict,

    // Coordinator errors
    SplitFailed,
    NothingToUndo,
    Forbidden,

    // Internal errors
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::AlreadyLocked => "already_locked",
            ErrorCode::NotLocked => "not_locked",
            ErrorCode::NotLockHolder => "not_lock_holder",
            ErrorCode::Conflict => "conflict",
            ErrorCode::SplitFailed => "split_failed",
            ErrorCode::NothingToUndo => "nothing_to_undo",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

/// Failure of a single task operation. Every failure is returned to the
/// caller as a value; nothing here terminates a worker.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("task {task_id} not found in project {project_id}")]
    TaskNotFound {
        project_id: ProjectId,
        task_id: TaskId,
    },

    #[error("cannot {action} task {task_id} in state {state}")]
    InvalidState {
        task_id: TaskId,
        state: TaskState,
        action: Action,
    },

    #[error("task {task_id} is already locked by {holder}")]
    AlreadyLocked { task_id: TaskId, holder: String },

    #[error("task {task_id} is not locked")]
    NotLocked { task_id: TaskId },

    #[error("task {task_id} is locked by {holder}, not {actor}")]
    NotLockHolder {
        task_id: TaskId,
        holder: String,
        actor: String,
    },

    #[error("concurrent modification{}", conflict_target(.task_id))]
    Conflict { task_id: Option<TaskId> },

    #[error("split of task {task_id} failed: {cause}")]
    SplitFailed { task_id: TaskId, cause: String },

    #[error("nothing to undo on task {task_id}")]
    NothingToUndo { task_id: TaskId },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("database error: {0}")]
    Storage(rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TaskError::ProjectNotFound(_) | TaskError::TaskNotFound { .. } => ErrorCode::NotFound,
            TaskError::InvalidState { .. } => ErrorCode::InvalidState,
            TaskError::AlreadyLocked { .. } => ErrorCode::AlreadyLocked,
            TaskError::NotLocked { .. } => ErrorCode::NotLocked,
            TaskError::NotLockHolder { .. } => ErrorCode::NotLockHolder,
            TaskError::Conflict { .. } => ErrorCode::Conflict,
            TaskError::SplitFailed { .. } => ErrorCode::SplitFailed,
            TaskError::NothingToUndo { .. } => ErrorCode::NothingToUndo,
            TaskError::Forbidden(_) => ErrorCode::Forbidden,
            TaskError::Storage(_) => ErrorCode::DatabaseError,
            TaskError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Only optimistic-concurrency conflicts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Conflict { .. })
    }

    pub fn task_not_found(project_id: ProjectId, task_id: TaskId) -> Self {
        TaskError::TaskNotFound {
            project_id,
            task_id,
        }
    }

    pub fn invalid_state(task_id: TaskId, state: TaskState, action: Action) -> Self {
        TaskError::InvalidState {
            task_id,
            state,
            action,
        }
    }

    pub fn conflict(task_id: TaskId) -> Self {
        TaskError::Conflict {
            task_id: Some(task_id),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        TaskError::Forbidden(reason.into())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        TaskError::Internal(err.to_string())
    }

    /// Short reason used in bulk outcome maps (`failed:<reason>`).
    pub fn short_reason(&self) -> String {
        match self {
            TaskError::InvalidState { state, .. } => format!("invalid_state({state})"),
            other => other.code().as_str().to_string(),
        }
    }
}

impl From<rusqlite::Error> for TaskError {
    fn from(err: rusqlite::Error) -> Self {
        // A deferred transaction that lost the race for the write lock.
        let busy = matches!(
            &err,
            rusqlite::Error::SqliteFailure(inner, _)
                if matches!(
                    inner.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        );
        if busy {
            TaskError::Conflict { task_id: None }
        } else {
            TaskError::Storage(err)
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<TaskError>() {
            Ok(task_err) => task_err,
            Err(err) => TaskError::internal(err),
        }
    }
}

fn conflict_target(task_id: &Option<TaskId>) -> String {
    task_id
        .map(|id| format!(" of task {id}"))
        .unwrap_or_default()
}

/// Result type for task operations.
pub type TaskResult<T> = std::result::Result<T, TaskError>;
