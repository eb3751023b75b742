//! Core types for the tasking core.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Project identifier.
pub type ProjectId = i64;

/// Task identifier, unique within a project.
pub type TaskId = i64;

/// Error returned when parsing one of the closed enumerations from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Ready,
    LockedForMapping,
    Mapped,
    LockedForValidation,
    Validated,
    Invalidated,
    #[serde(rename = "BADIMAGERY")]
    BadImagery,
    Split,
}

impl TaskState {
    pub const ALL: [TaskState; 8] = [
        TaskState::Ready,
        TaskState::LockedForMapping,
        TaskState::Mapped,
        TaskState::LockedForValidation,
        TaskState::Validated,
        TaskState::Invalidated,
        TaskState::BadImagery,
        TaskState::Split,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Ready => "READY",
            TaskState::LockedForMapping => "LOCKED_FOR_MAPPING",
            TaskState::Mapped => "MAPPED",
            TaskState::LockedForValidation => "LOCKED_FOR_VALIDATION",
            TaskState::Validated => "VALIDATED",
            TaskState::Invalidated => "INVALIDATED",
            TaskState::BadImagery => "BADIMAGERY",
            TaskState::Split => "SPLIT",
        }
    }

    /// True for the two `LOCKED_*` states.
    pub fn is_locked(&self) -> bool {
        matches!(
            self,
            TaskState::LockedForMapping | TaskState::LockedForValidation
        )
    }

    /// A split task accepts no further mutations.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Split)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("task state", s))
    }
}

/// The kind of action recorded in a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Creation marker for a new task (including split children).
    Created,
    LockForMapping,
    StopMapping,
    MarkMapped,
    MarkBadImagery,
    LockForValidation,
    StopValidation,
    Validate,
    Invalidate,
    /// Lock cleared by someone other than its holder.
    ForceUnlock,
    /// Privileged reset back to `READY`.
    Reset,
    Split,
    Undo,
}

impl Action {
    pub const ALL: [Action; 13] = [
        Action::Created,
        Action::LockForMapping,
        Action::StopMapping,
        Action::MarkMapped,
        Action::MarkBadImagery,
        Action::LockForValidation,
        Action::StopValidation,
        Action::Validate,
        Action::Invalidate,
        Action::ForceUnlock,
        Action::Reset,
        Action::Split,
        Action::Undo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::LockForMapping => "lock_for_mapping",
            Action::StopMapping => "stop_mapping",
            Action::MarkMapped => "mark_mapped",
            Action::MarkBadImagery => "mark_bad_imagery",
            Action::LockForValidation => "lock_for_validation",
            Action::StopValidation => "stop_validation",
            Action::Validate => "validate",
            Action::Invalidate => "invalidate",
            Action::ForceUnlock => "force_unlock",
            Action::Reset => "reset",
            Action::Split => "split",
            Action::Undo => "undo",
        }
    }

    /// Actions a user may take back with `undo_last_action`.
    pub fn is_reversible(&self) -> bool {
        matches!(
            self,
            Action::LockForMapping
                | Action::LockForValidation
                | Action::MarkMapped
                | Action::MarkBadImagery
                | Action::Validate
                | Action::Invalidate
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("action", s))
    }
}

/// Permission level of an actor, as reported by the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Mapper,
    Validator,
    ProjectManager,
    Admin,
}

impl Role {
    /// Project managers and admins may force unlocks and run bulk actions.
    pub fn is_privileged(&self) -> bool {
        *self >= Role::ProjectManager
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Mapper => "mapper",
            Role::Validator => "validator",
            Role::ProjectManager => "project_manager",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mapper" => Ok(Role::Mapper),
            "validator" => Ok(Role::Validator),
            "project_manager" | "manager" | "pm" => Ok(Role::ProjectManager),
            "admin" => Ok(Role::Admin),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

/// A project: the scope tasks belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub created_at: i64,
}

/// A unit of mapping/validation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub project_id: ProjectId,
    pub task_id: TaskId,
    pub state: TaskState,
    pub locked_by: Option<String>,
    pub lock_acquired_at: Option<i64>,
    pub mapped_by: Option<String>,
    pub validated_by: Option<String>,
    /// Opaque handle to the task boundary, owned by the geometry service.
    pub geometry_ref: String,
    /// Set on children produced by a split.
    pub parent_task_id: Option<TaskId>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Age of the current lock in milliseconds, if locked.
    pub fn lock_age_ms(&self, now: i64) -> Option<i64> {
        self.lock_acquired_at.map(|acquired| now - acquired)
    }
}

/// One immutable row of the history ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub project_id: ProjectId,
    pub task_id: TaskId,
    pub sequence_no: i64,
    pub actor: String,
    pub action: Action,
    /// `None` only on creation markers.
    pub previous_state: Option<TaskState>,
    pub new_state: TaskState,
    pub comment: Option<String>,
    pub timestamp: i64,
}

/// Final state requested when releasing a validation lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub task_id: TaskId,
    pub new_state: TaskState,
    pub comment: Option<String>,
}

/// Project-wide actions applied task by task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    MapAll,
    ValidateAll,
    InvalidateAll,
    ResetBadImagery,
    ResetAll,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::MapAll => "map_all",
            BulkAction::ValidateAll => "validate_all",
            BulkAction::InvalidateAll => "invalidate_all",
            BulkAction::ResetBadImagery => "reset_bad_imagery",
            BulkAction::ResetAll => "reset_all",
        }
    }

    /// States selected by this action's filter.
    pub fn selects(&self, state: TaskState) -> bool {
        match self {
            BulkAction::MapAll => matches!(
                state,
                TaskState::Ready | TaskState::Invalidated | TaskState::LockedForMapping
            ),
            BulkAction::ValidateAll => matches!(
                state,
                TaskState::Mapped | TaskState::LockedForValidation
            ),
            BulkAction::InvalidateAll => matches!(
                state,
                TaskState::Mapped | TaskState::Validated | TaskState::LockedForValidation
            ),
            BulkAction::ResetBadImagery => state == TaskState::BadImagery,
            BulkAction::ResetAll => true,
        }
    }

    /// Resets override lock ownership and require a privileged actor.
    pub fn is_forced(&self) -> bool {
        matches!(self, BulkAction::ResetBadImagery | BulkAction::ResetAll)
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a bulk step left a task alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Locked by someone other than the acting user.
    Locked,
    /// The task left the filtered set before its step ran.
    StateChanged,
    /// Already `READY`; a reset has nothing to do.
    AlreadyReady,
    /// Split tasks are retired and never reset.
    Terminal,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Locked => "locked",
            SkipReason::StateChanged => "state_changed",
            SkipReason::AlreadyReady => "already_ready",
            SkipReason::Terminal => "terminal",
        }
    }
}

/// Per-task outcome of a bulk action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Applied,
    Skipped(SkipReason),
    Failed(String),
}

impl BulkOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, BulkOutcome::Applied)
    }
}

impl fmt::Display for BulkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkOutcome::Applied => f.write_str("applied"),
            BulkOutcome::Skipped(reason) => write!(f, "skipped:{}", reason.as_str()),
            BulkOutcome::Failed(reason) => write!(f, "failed:{}", reason),
        }
    }
}

impl Serialize for BulkOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Complete per-task outcome map of a bulk action. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BulkActionResult {
    pub action: BulkAction,
    pub outcomes: BTreeMap<TaskId, BulkOutcome>,
}

impl BulkActionResult {
    pub fn new(action: BulkAction) -> Self {
        Self {
            action,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, task_id: TaskId, outcome: BulkOutcome) {
        self.outcomes.insert(task_id, outcome);
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_applied()).count()
    }

    pub fn outcome(&self, task_id: TaskId) -> Option<&BulkOutcome> {
        self.outcomes.get(&task_id)
    }
}

/// Sort order for a user's task activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySort {
    /// Oldest action first.
    ActionDate,
    /// Most recent action first.
    #[default]
    ActionDateDesc,
}

/// Filters for `user_task_activity`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserTaskFilter {
    pub project_id: Option<ProjectId>,
    /// Current state of the task.
    pub state: Option<TaskState>,
    /// Inclusive lower bound on the user's last action timestamp.
    pub from: Option<i64>,
    /// Inclusive upper bound on the user's last action timestamp.
    pub to: Option<i64>,
    #[serde(default)]
    pub sort: ActivitySort,
}

/// A task a user has acted on, with the time of their latest action.
#[derive(Debug, Clone, Serialize)]
pub struct UserTaskActivity {
    #[serde(flatten)]
    pub task: Task,
    pub action_date: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_parses_case_insensitively() {
        assert_eq!(
            "locked-for-mapping".parse::<TaskState>().unwrap(),
            TaskState::LockedForMapping
        );
        assert_eq!("BADIMAGERY".parse::<TaskState>().unwrap(), TaskState::BadImagery);
        assert!("bogus".parse::<TaskState>().is_err());
    }

    #[test]
    fn task_state_serializes_as_storage_name() {
        let json = serde_json::to_string(&TaskState::BadImagery).unwrap();
        assert_eq!(json, "\"BADIMAGERY\"");
        let json = serde_json::to_string(&TaskState::LockedForValidation).unwrap();
        assert_eq!(json, "\"LOCKED_FOR_VALIDATION\"");
    }

    #[test]
    fn bulk_outcome_renders_reason() {
        assert_eq!(BulkOutcome::Applied.to_string(), "applied");
        assert_eq!(
            BulkOutcome::Skipped(SkipReason::Locked).to_string(),
            "skipped:locked"
        );
        assert_eq!(
            BulkOutcome::Failed("conflict".into()).to_string(),
            "failed:conflict"
        );
    }

    #[test]
    fn reset_all_selects_every_state() {
        for state in TaskState::ALL {
            assert!(BulkAction::ResetAll.selects(state), "{state}");
        }
        assert!(!BulkAction::ResetBadImagery.selects(TaskState::Ready));
    }

    #[test]
    fn privileged_roles() {
        assert!(!Role::Mapper.is_privileged());
        assert!(!Role::Validator.is_privileged());
        assert!(Role::ProjectManager.is_privileged());
        assert!(Role::Admin.is_privileged());
        assert_eq!("pm".parse::<Role>().unwrap(), Role::ProjectManager);
    }
}
