//! Read-side queries. These never block writers and may observe a snapshot
//! that a concurrent transaction is about to replace.

use super::tasks::{TASK_COLUMNS, parse_task_row, require_project};
use super::{Database, now_ms};
use crate::config::LockingConfig;
use crate::error::TaskResult;
use crate::types::{
    ActivitySort, ProjectId, Task, TaskId, TaskState, UserTaskActivity, UserTaskFilter,
};
use rusqlite::params;
use serde::Serialize;

/// Tasks currently sitting in `MAPPED`, grouped by the user who mapped them.
#[derive(Debug, Clone, Serialize)]
pub struct MappedByUser {
    pub mapped_by: String,
    pub task_ids: Vec<TaskId>,
    pub last_mapped_at: i64,
}

impl Database {
    /// Every task, across projects, currently locked by `actor`.
    pub fn locked_tasks_for_user(&self, actor: &str) -> TaskResult<Vec<Task>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE locked_by = ?1 ORDER BY project_id, task_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params![actor], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Locks in a project older than the configured TTL. Listing them does
    /// not release them.
    pub fn stale_locks(&self, project_id: ProjectId, locking: &LockingConfig) -> TaskResult<Vec<Task>> {
        let cutoff = now_ms() - locking.ttl_ms();
        self.with_conn(|conn| {
            require_project(conn, project_id)?;
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE project_id = ?1 AND locked_by IS NOT NULL AND lock_acquired_at < ?2
                 ORDER BY lock_acquired_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params![project_id, cutoff], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Mapped-but-unvalidated work per mapper.
    pub fn mapped_tasks_by_user(&self, project_id: ProjectId) -> TaskResult<Vec<MappedByUser>> {
        self.with_conn(|conn| {
            require_project(conn, project_id)?;
            let mut stmt = conn.prepare(
                "SELECT mapped_by, task_id, updated_at FROM tasks
                 WHERE project_id = ?1 AND state = ?2 AND mapped_by IS NOT NULL
                 ORDER BY mapped_by, task_id",
            )?;
            let mut rows = stmt.query(params![project_id, TaskState::Mapped])?;

            let mut groups: Vec<MappedByUser> = Vec::new();
            while let Some(row) = rows.next()? {
                let mapped_by: String = row.get(0)?;
                let task_id: TaskId = row.get(1)?;
                let updated_at: i64 = row.get(2)?;

                match groups.last_mut() {
                    Some(group) if group.mapped_by == mapped_by => {
                        group.task_ids.push(task_id);
                        group.last_mapped_at = group.last_mapped_at.max(updated_at);
                    }
                    _ => groups.push(MappedByUser {
                        mapped_by,
                        task_ids: vec![task_id],
                        last_mapped_at: updated_at,
                    }),
                }
            }
            Ok(groups)
        })
    }

    /// Tasks `actor` mapped that a validator has since invalidated.
    pub fn invalidated_tasks_for_user(&self, project_id: ProjectId, actor: &str) -> TaskResult<Vec<Task>> {
        self.with_conn(|conn| {
            require_project(conn, project_id)?;
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE project_id = ?1 AND state = ?2 AND mapped_by = ?3
                 ORDER BY task_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params![project_id, TaskState::Invalidated, actor], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Tasks `actor` has acted on, with the time of their latest action.
    pub fn user_task_activity(
        &self,
        actor: &str,
        filter: &UserTaskFilter,
    ) -> TaskResult<Vec<UserTaskActivity>> {
        self.with_conn(|conn| {
            let columns = TASK_COLUMNS
                .split(", ")
                .map(|c| format!("t.{c} AS {c}"))
                .collect::<Vec<_>>()
                .join(", ");

            let mut sql = format!(
                "SELECT {columns}, h.action_date AS action_date
                 FROM tasks t
                 JOIN (SELECT project_id, task_id, MAX(timestamp) AS action_date
                       FROM task_history WHERE actor = ?1
                       GROUP BY project_id, task_id) h
                   ON h.project_id = t.project_id AND h.task_id = t.task_id
                 WHERE 1=1"
            );
            let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(actor.to_string())];

            if let Some(project_id) = filter.project_id {
                sql.push_str(&format!(" AND t.project_id = ?{}", param_values.len() + 1));
                param_values.push(Box::new(project_id));
            }

            if let Some(state) = filter.state {
                sql.push_str(&format!(" AND t.state = ?{}", param_values.len() + 1));
                param_values.push(Box::new(state));
            }

            if let Some(from) = filter.from {
                sql.push_str(&format!(" AND h.action_date >= ?{}", param_values.len() + 1));
                param_values.push(Box::new(from));
            }

            if let Some(to) = filter.to {
                sql.push_str(&format!(" AND h.action_date <= ?{}", param_values.len() + 1));
                param_values.push(Box::new(to));
            }

            sql.push_str(match filter.sort {
                ActivitySort::ActionDate => " ORDER BY action_date ASC, t.project_id, t.task_id",
                ActivitySort::ActionDateDesc => " ORDER BY action_date DESC, t.project_id, t.task_id",
            });

            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                param_values.iter().map(|b| b.as_ref()).collect();

            let activity = stmt
                .query_map(param_refs.as_slice(), |row| {
                    Ok(UserTaskActivity {
                        task: parse_task_row(row)?,
                        action_date: row.get("action_date")?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(activity)
        })
    }
}
