//! Integration tests for read-side queries.

use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;
use tasking_core::collaborators::StaticDirectory;
use tasking_core::config::LockingConfig;
use tasking_core::types::{
    ActivitySort, ProjectId, Role, TaskState, UserTaskFilter, ValidationOutcome,
};
use tasking_core::{Database, TaskManager};

fn setup(tasks: usize) -> (TaskManager, ProjectId) {
    let db = Database::open_in_memory().expect("Failed to create in-memory database");
    let project = db.create_project("queries").expect("Failed to create project");
    for i in 0..tasks {
        db.add_task(project.id, &format!("16/{i}/7"), "pm")
            .expect("Failed to add task");
    }
    let users = StaticDirectory::new()
        .with_default_role(Role::Mapper)
        .with_user("V", Role::Validator);
    let tm = TaskManager::new(db, Arc::new(users)).with_locking(LockingConfig {
        lock_ttl_seconds: 30,
        reclaim_stale_locks: false,
    });
    (tm, project.id)
}

fn map(tm: &TaskManager, project: ProjectId, task_id: i64, actor: &str) {
    tm.lock_for_mapping(project, task_id, actor).unwrap();
    tm.unlock_after_mapping(project, task_id, actor, TaskState::Mapped, None)
        .unwrap();
}

#[test]
fn list_filters_by_state() {
    let (tm, project) = setup(3);
    map(&tm, project, 2, "A");

    let ready = tm.list_tasks(project, Some(TaskState::Ready)).unwrap();
    assert_eq!(ready.iter().map(|t| t.task_id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(tm.list_tasks(project, None).unwrap().len(), 3);
}

#[test]
fn locked_tasks_span_projects() {
    let (tm, first) = setup(2);
    let second = tm.database().create_project("other").unwrap().id;
    tm.database().add_task(second, "16/0/0", "pm").unwrap();

    tm.lock_for_mapping(first, 2, "A").unwrap();
    tm.lock_for_mapping(second, 1, "A").unwrap();
    tm.lock_for_mapping(first, 1, "B").unwrap();

    let mine = tm.database().locked_tasks_for_user("A").unwrap();
    let keys: Vec<_> = mine.iter().map(|t| (t.project_id, t.task_id)).collect();
    assert_eq!(keys, vec![(first, 2), (second, 1)]);
}

#[test]
fn stale_locks_are_listed_not_released() {
    let (tm, project) = setup(2);
    tm.lock_for_mapping(project, 1, "A").unwrap();
    tm.lock_for_mapping(project, 2, "B").unwrap();
    tm.database()
        .with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET lock_acquired_at = lock_acquired_at - 31000 WHERE task_id = ?1",
                params![1],
            )?;
            Ok(())
        })
        .unwrap();

    let stale = tm.database().stale_locks(project, tm.locking()).unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].task_id, 1);
    assert_eq!(
        tm.get_task(project, 1).unwrap().state,
        TaskState::LockedForMapping
    );

    // Reclaiming is switched off, so a new lock request still fails.
    assert!(tm.lock_for_mapping(project, 1, "C").is_err());
    tm.release_stale_lock(project, 1, "C").unwrap();
    tm.lock_for_mapping(project, 1, "C").unwrap();
}

#[test]
fn mapped_work_is_grouped_by_mapper() {
    let (tm, project) = setup(3);
    map(&tm, project, 1, "A");
    map(&tm, project, 2, "B");
    map(&tm, project, 3, "A");

    let groups = tm.database().mapped_tasks_by_user(project).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].mapped_by, "A");
    assert_eq!(groups[0].task_ids, vec![1, 3]);
    assert_eq!(groups[1].mapped_by, "B");
    assert_eq!(groups[1].task_ids, vec![2]);
}

#[test]
fn invalidated_work_is_returned_to_its_mapper() {
    let (tm, project) = setup(2);
    map(&tm, project, 1, "A");
    map(&tm, project, 2, "A");
    tm.lock_for_validation(project, &[1, 2], "V").unwrap();
    tm.unlock_after_validation(
        project,
        &[
            ValidationOutcome {
                task_id: 1,
                new_state: TaskState::Invalidated,
                comment: None,
            },
            ValidationOutcome {
                task_id: 2,
                new_state: TaskState::Validated,
                comment: None,
            },
        ],
        "V",
    )
    .unwrap();

    let back = tm.database().invalidated_tasks_for_user(project, "A").unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].task_id, 1);
    assert!(tm
        .database()
        .invalidated_tasks_for_user(project, "B")
        .unwrap()
        .is_empty());
}

#[test]
fn activity_is_sorted_and_filtered() {
    let (tm, project) = setup(2);
    tm.lock_for_mapping(project, 1, "A").unwrap();
    std::thread::sleep(Duration::from_millis(5));
    map(&tm, project, 2, "A");

    let newest_first = tm
        .database()
        .user_task_activity("A", &UserTaskFilter::default())
        .unwrap();
    let ids: Vec<_> = newest_first.iter().map(|a| a.task.task_id).collect();
    assert_eq!(ids, vec![2, 1]);

    let oldest_first = tm
        .database()
        .user_task_activity(
            "A",
            &UserTaskFilter {
                sort: ActivitySort::ActionDate,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(oldest_first[0].task.task_id, 1);

    let mapped_only = tm
        .database()
        .user_task_activity(
            "A",
            &UserTaskFilter {
                project_id: Some(project),
                state: Some(TaskState::Mapped),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(mapped_only.len(), 1);

    let future = tm
        .database()
        .user_task_activity(
            "A",
            &UserTaskFilter {
                from: Some(newest_first[0].action_date + 1),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(future.is_empty());
}
