//! Integration tests for the task workflow.
//!
//! These tests drive `TaskManager` against an in-memory SQLite database and
//! check lock ownership, the transition table and the history ledger.

use std::sync::Arc;
use tasking_core::collaborators::{MemorySink, NotificationSink, StaticDirectory};
use tasking_core::db::history::{replay_history, verify_history};
use tasking_core::error::ErrorCode;
use tasking_core::types::{Action, HistoryEntry, ProjectId, Role, Task, TaskState, ValidationOutcome};
use tasking_core::{Database, TaskManager};

/// Helper to create a manager over a fresh project with `tasks` READY tasks.
fn setup(tasks: usize) -> (TaskManager, ProjectId) {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let project = db.create_project("workflow").expect("Failed to create project");
    for i in 0..tasks {
        db.add_task(project.id, &format!("14/{}/{}", 100 + i, 200), "pm")
            .expect("Failed to add task");
    }
    let users = StaticDirectory::new()
        .with_user("A", Role::Mapper)
        .with_user("B", Role::Mapper)
        .with_user("V", Role::Validator)
        .with_user("M", Role::ProjectManager)
        .with_user("pm", Role::Admin);
    (TaskManager::new(db, Arc::new(users)), project.id)
}

fn assert_lock_invariant(task: &Task) {
    assert_eq!(
        task.locked_by.is_some(),
        task.state.is_locked(),
        "lock fields disagree with state on {task:?}"
    );
    assert_eq!(task.locked_by.is_some(), task.lock_acquired_at.is_some());
}

fn assert_history_replays(tm: &TaskManager, project: ProjectId, task: &Task) {
    let history = tm.task_history(project, task.task_id).unwrap();
    assert_eq!(verify_history(&history), Ok(()));
    assert_eq!(replay_history(&history), Ok(Some(task.state)));
}

mod scenario_tests {
    use super::*;

    #[test]
    fn map_invalidate_and_remap() {
        let (tm, project) = setup(1);

        let task = tm.lock_for_mapping(project, 1, "A").unwrap();
        assert_eq!(task.state, TaskState::LockedForMapping);
        assert_eq!(task.locked_by.as_deref(), Some("A"));

        let err = tm.lock_for_mapping(project, 1, "B").unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyLocked);

        let task = tm
            .unlock_after_mapping(project, 1, "A", TaskState::Mapped, None)
            .unwrap();
        assert_eq!(task.state, TaskState::Mapped);
        assert!(task.locked_by.is_none());

        let locked = tm.lock_for_validation(project, &[1], "M").unwrap();
        assert_eq!(locked[0].state, TaskState::LockedForValidation);

        let done = tm
            .unlock_after_validation(
                project,
                &[ValidationOutcome {
                    task_id: 1,
                    new_state: TaskState::Invalidated,
                    comment: Some("missing buildings".into()),
                }],
                "M",
            )
            .unwrap();
        assert_eq!(done[0].state, TaskState::Invalidated);

        let task = tm.lock_for_mapping(project, 1, "A").unwrap();
        assert_eq!(task.state, TaskState::LockedForMapping);

        assert_history_replays(&tm, project, &task);
        let history = tm.task_history(project, 1).unwrap();
        assert_eq!(history[4].comment.as_deref(), Some("missing buildings"));
    }

    #[test]
    fn bad_imagery_is_a_mapping_outcome() {
        let (tm, project) = setup(1);
        tm.lock_for_mapping(project, 1, "A").unwrap();

        let task = tm
            .unlock_after_mapping(project, 1, "A", TaskState::BadImagery, Some("clouds"))
            .unwrap();
        assert_eq!(task.state, TaskState::BadImagery);
        assert_eq!(task.mapped_by.as_deref(), Some("A"));

        let err = tm.lock_for_mapping(project, 1, "A").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }
}

mod lock_tests {
    use super::*;

    #[test]
    fn release_by_non_holder_changes_nothing() {
        let (tm, project) = setup(1);
        let before = tm.lock_for_mapping(project, 1, "A").unwrap();

        for result in [
            tm.stop_mapping(project, 1, "B"),
            tm.unlock_after_mapping(project, 1, "B", TaskState::Mapped, None),
        ] {
            assert_eq!(result.unwrap_err().code(), ErrorCode::NotLockHolder);
        }

        let after = tm.get_task(project, 1).unwrap();
        assert_eq!(before, after);
        assert_eq!(tm.task_history(project, 1).unwrap().len(), 2);
    }

    #[test]
    fn second_stop_fails_and_leaves_state() {
        let (tm, project) = setup(1);
        tm.lock_for_mapping(project, 1, "A").unwrap();
        let stopped = tm.stop_mapping(project, 1, "A").unwrap();

        let err = tm.stop_mapping(project, 1, "A").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotLocked);
        assert_eq!(tm.get_task(project, 1).unwrap(), stopped);
    }

    #[test]
    fn validation_lock_is_not_a_mapping_lock() {
        let (tm, project) = setup(1);
        tm.lock_for_mapping(project, 1, "A").unwrap();
        tm.unlock_after_mapping(project, 1, "A", TaskState::Mapped, None)
            .unwrap();
        tm.lock_for_validation(project, &[1], "V").unwrap();

        let err = tm.stop_mapping(project, 1, "V").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn mapping_a_mapped_task_is_invalid() {
        let (tm, project) = setup(1);
        tm.lock_for_mapping(project, 1, "A").unwrap();
        tm.unlock_after_mapping(project, 1, "A", TaskState::Mapped, None)
            .unwrap();

        let err = tm.lock_for_mapping(project, 1, "B").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn missing_task_is_not_found() {
        let (tm, project) = setup(1);
        let err = tm.lock_for_mapping(project, 42, "A").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn invariant_holds_through_a_mixed_session() {
        let (tm, project) = setup(4);

        tm.lock_for_mapping(project, 1, "A").unwrap();
        tm.lock_for_mapping(project, 2, "B").unwrap();
        tm.unlock_after_mapping(project, 2, "B", TaskState::Mapped, None)
            .unwrap();
        tm.lock_for_validation(project, &[2], "V").unwrap();
        tm.lock_for_mapping(project, 3, "A").unwrap();
        tm.stop_mapping(project, 3, "A").unwrap();
        tm.force_unlock(project, 1, "M").unwrap();
        let _ = tm.lock_for_mapping(project, 2, "A");

        for task in tm.list_tasks(project, None).unwrap() {
            assert_lock_invariant(&task);
            assert_history_replays(&tm, project, &task);
        }
    }
}

mod notification_tests {
    use super::*;
    use anyhow::bail;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn notify(&self, _event: &HistoryEntry) -> anyhow::Result<()> {
            bail!("sink offline")
        }
    }

    #[test]
    fn committed_transitions_are_published_in_order() {
        let (tm, project) = setup(1);
        let sink = Arc::new(MemorySink::new());
        let tm = tm.with_notifier(sink.clone());

        tm.lock_for_mapping(project, 1, "A").unwrap();
        tm.unlock_after_mapping(project, 1, "A", TaskState::Mapped, None)
            .unwrap();

        let actions: Vec<Action> = sink.take().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![Action::LockForMapping, Action::MarkMapped]);
    }

    #[test]
    fn refused_operations_publish_nothing() {
        let (tm, project) = setup(2);
        let sink = Arc::new(MemorySink::new());
        let tm = tm.with_notifier(sink.clone());

        tm.lock_for_mapping(project, 1, "A").unwrap();
        sink.take();

        assert!(tm.lock_for_mapping(project, 1, "B").is_err());
        // Task 2 is READY, so the whole list is refused.
        assert!(tm.lock_for_validation(project, &[2], "V").is_err());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn sink_failure_does_not_roll_back() {
        let (tm, project) = setup(1);
        let tm = tm.with_notifier(Arc::new(FailingSink));

        let task = tm.lock_for_mapping(project, 1, "A").unwrap();
        assert_eq!(task.state, TaskState::LockedForMapping);
        assert_eq!(
            tm.get_task(project, 1).unwrap().state,
            TaskState::LockedForMapping
        );
    }
}

mod stale_validation_lock_tests {
    use super::*;
    use rusqlite::params;
    use tasking_core::config::LockingConfig;

    fn reclaiming(tasks: usize) -> (TaskManager, ProjectId) {
        let (tm, project) = setup(tasks);
        let tm = tm.with_locking(LockingConfig {
            lock_ttl_seconds: 60,
            reclaim_stale_locks: true,
        });
        (tm, project)
    }

    fn backdate_lock(tm: &TaskManager, project: ProjectId, task_id: i64) {
        tm.database()
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE tasks SET lock_acquired_at = lock_acquired_at - 61000
                     WHERE project_id = ?1 AND task_id = ?2",
                    params![project, task_id],
                )?;
                Ok(())
            })
            .unwrap();
    }

    fn validate(tm: &TaskManager, project: ProjectId, task_id: i64, actor: &str) {
        tm.lock_for_validation(project, &[task_id], actor).unwrap();
        tm.unlock_after_validation(
            project,
            &[ValidationOutcome {
                task_id,
                new_state: TaskState::Validated,
                comment: None,
            }],
            actor,
        )
        .unwrap();
    }

    fn actions(tm: &TaskManager, project: ProjectId, task_id: i64) -> Vec<Action> {
        tm.task_history(project, task_id)
            .unwrap()
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }

    #[test]
    fn stale_validation_lock_on_mapped_work_is_taken_over() {
        let (tm, project) = reclaiming(1);
        tm.lock_for_mapping(project, 1, "A").unwrap();
        tm.unlock_after_mapping(project, 1, "A", TaskState::Mapped, None)
            .unwrap();
        tm.lock_for_validation(project, &[1], "M").unwrap();

        // Fresh locks are never reclaimed.
        let err = tm.lock_for_validation(project, &[1], "V").unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyLocked);

        backdate_lock(&tm, project, 1);
        let locked = tm.lock_for_validation(project, &[1], "V").unwrap();
        assert_eq!(locked[0].state, TaskState::LockedForValidation);
        assert_eq!(locked[0].locked_by.as_deref(), Some("V"));

        let history = tm.task_history(project, 1).unwrap();
        let released = &history[history.len() - 2];
        assert_eq!(released.action, Action::ForceUnlock);
        assert_eq!(released.new_state, TaskState::Mapped);
        assert_eq!(
            actions(&tm, project, 1)[3..],
            [Action::LockForValidation, Action::ForceUnlock, Action::LockForValidation]
        );
        assert_lock_invariant(&locked[0]);
        assert_history_replays(&tm, project, &locked[0]);
    }

    #[test]
    fn stale_reopen_lock_goes_only_to_a_manager() {
        let (tm, project) = reclaiming(1);
        tm.lock_for_mapping(project, 1, "A").unwrap();
        tm.unlock_after_mapping(project, 1, "A", TaskState::Mapped, None)
            .unwrap();
        validate(&tm, project, 1, "V");

        tm.lock_for_validation(project, &[1], "M").unwrap();
        backdate_lock(&tm, project, 1);
        let before = actions(&tm, project, 1);

        let err = tm.lock_for_validation(project, &[1], "V").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        let task = tm.get_task(project, 1).unwrap();
        assert_eq!(task.state, TaskState::LockedForValidation);
        assert_eq!(task.locked_by.as_deref(), Some("M"));
        assert_eq!(actions(&tm, project, 1), before);

        let locked = tm.lock_for_validation(project, &[1], "pm").unwrap();
        assert_eq!(locked[0].locked_by.as_deref(), Some("pm"));

        // The new holder's lock still remembers the task was validated.
        let stopped = tm.stop_validation(project, &[1], "pm").unwrap();
        assert_eq!(stopped[0].state, TaskState::Validated);
        assert_history_replays(&tm, project, &stopped[0]);
    }
}
