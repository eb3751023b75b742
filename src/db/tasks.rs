//! Task entity store: the system of record for task rows.

use super::history::{append_entry, NewEntry};
use super::{Database, Unit, now_ms};
use crate::error::{TaskError, TaskResult};
use crate::types::{Action, Project, ProjectId, Task, TaskId, TaskState};
use rusqlite::{Connection, OptionalExtension, Row, params};

pub(crate) const TASK_COLUMNS: &str = "project_id, task_id, state, locked_by, lock_acquired_at, \
     mapped_by, validated_by, geometry_ref, parent_task_id, version, created_at, updated_at";

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        project_id: row.get("project_id")?,
        task_id: row.get("task_id")?,
        state: row.get("state")?,
        locked_by: row.get("locked_by")?,
        lock_acquired_at: row.get("lock_acquired_at")?,
        mapped_by: row.get("mapped_by")?,
        validated_by: row.get("validated_by")?,
        geometry_ref: row.get("geometry_ref")?,
        parent_task_id: row.get("parent_task_id")?,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) fn project_exists(conn: &Connection, project_id: ProjectId) -> TaskResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM projects WHERE id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn require_project(conn: &Connection, project_id: ProjectId) -> TaskResult<()> {
    if project_exists(conn, project_id)? {
        Ok(())
    } else {
        Err(TaskError::ProjectNotFound(project_id))
    }
}

pub(crate) fn load_task(
    conn: &Connection,
    project_id: ProjectId,
    task_id: TaskId,
) -> TaskResult<Option<Task>> {
    let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 AND task_id = ?2");
    let task = conn
        .query_row(&sql, params![project_id, task_id], parse_task_row)
        .optional()?;
    Ok(task)
}

/// Load a task or fail with `NotFound`.
pub(crate) fn require_task(
    conn: &Connection,
    project_id: ProjectId,
    task_id: TaskId,
) -> TaskResult<Task> {
    load_task(conn, project_id, task_id)?
        .ok_or_else(|| TaskError::task_not_found(project_id, task_id))
}

pub(crate) fn list_project_tasks(
    conn: &Connection,
    project_id: ProjectId,
    state: Option<TaskState>,
) -> TaskResult<Vec<Task>> {
    let tasks = match state {
        Some(state) => {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 AND state = ?2 ORDER BY task_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![project_id, state], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let sql =
                format!("SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 ORDER BY task_id");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params![project_id], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(tasks)
}

pub(crate) fn next_task_id(conn: &Connection, project_id: ProjectId) -> TaskResult<TaskId> {
    let next: TaskId = conn.query_row(
        "SELECT COALESCE(MAX(task_id), 0) + 1 FROM tasks WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;
    Ok(next)
}

/// Insert a fresh `READY` task and its creation marker.
pub(crate) fn insert_task(
    unit: &mut Unit<'_>,
    project_id: ProjectId,
    geometry_ref: &str,
    parent_task_id: Option<TaskId>,
    actor: &str,
    comment: Option<&str>,
) -> TaskResult<Task> {
    let now = unit.now();
    let task_id = next_task_id(unit.conn(), project_id)?;

    let task = Task {
        project_id,
        task_id,
        state: TaskState::Ready,
        locked_by: None,
        lock_acquired_at: None,
        mapped_by: None,
        validated_by: None,
        geometry_ref: geometry_ref.to_string(),
        parent_task_id,
        version: 1,
        created_at: now,
        updated_at: now,
    };

    unit.conn().execute(
        "INSERT INTO tasks (project_id, task_id, state, geometry_ref, parent_task_id, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            project_id,
            task_id,
            task.state,
            &task.geometry_ref,
            parent_task_id,
            task.version,
            now,
            now
        ],
    )?;

    let entry = append_entry(
        unit.conn(),
        NewEntry {
            project_id,
            task_id,
            actor,
            action: Action::Created,
            previous_state: None,
            new_state: TaskState::Ready,
            comment,
            timestamp: now,
        },
    )?;
    unit.push_entry(entry);

    Ok(task)
}

/// Write `next` over `expected`, conditioned on the row still holding the
/// version and state that were read. Zero matched rows means another writer
/// got there first.
pub(crate) fn write_guarded(conn: &Connection, expected: &Task, next: &Task) -> TaskResult<()> {
    let changed = conn.execute(
        "UPDATE tasks
         SET state = ?1, locked_by = ?2, lock_acquired_at = ?3, mapped_by = ?4,
             validated_by = ?5, version = ?6, updated_at = ?7
         WHERE project_id = ?8 AND task_id = ?9 AND version = ?10 AND state = ?11",
        params![
            next.state,
            next.locked_by,
            next.lock_acquired_at,
            next.mapped_by,
            next.validated_by,
            next.version,
            next.updated_at,
            expected.project_id,
            expected.task_id,
            expected.version,
            expected.state,
        ],
    )?;

    if changed == 0 {
        return Err(TaskError::conflict(expected.task_id));
    }
    Ok(())
}

impl Database {
    /// Create a project to hold tasks.
    pub fn create_project(&self, name: &str) -> TaskResult<Project> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (name, created_at) VALUES (?1, ?2)",
                params![name, now],
            )?;
            Ok(Project {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                created_at: now,
            })
        })
    }

    /// Add a `READY` task covering `geometry_ref` to a project.
    pub fn add_task(&self, project_id: ProjectId, geometry_ref: &str, actor: &str) -> TaskResult<Task> {
        let (task, _) = self.with_tx(|unit| {
            require_project(unit.conn(), project_id)?;
            insert_task(unit, project_id, geometry_ref, None, actor, None)
        })?;
        Ok(task)
    }

    pub fn get_task(&self, project_id: ProjectId, task_id: TaskId) -> TaskResult<Option<Task>> {
        self.with_conn(|conn| load_task(conn, project_id, task_id))
    }

    /// List a project's tasks, optionally restricted to one state.
    pub fn list_tasks(&self, project_id: ProjectId, state: Option<TaskState>) -> TaskResult<Vec<Task>> {
        self.with_conn(|conn| {
            require_project(conn, project_id)?;
            list_project_tasks(conn, project_id, state)
        })
    }
}
