//! History ledger: append-only record of every task state transition.
//!
//! Rows are never updated or deleted (the schema rejects both). The current
//! task row, not the ledger, decides what may happen next.

use super::Database;
use crate::error::{TaskError, TaskResult};
use crate::state_machine;
use crate::types::{Action, HistoryEntry, ProjectId, TaskId, TaskState};
use rusqlite::{Connection, OptionalExtension, Row, params};

const HISTORY_COLUMNS: &str =
    "project_id, task_id, sequence_no, actor, action, previous_state, new_state, comment, timestamp";

/// Fields of an entry about to be appended; the sequence number is assigned
/// by the ledger.
pub(crate) struct NewEntry<'a> {
    pub project_id: ProjectId,
    pub task_id: TaskId,
    pub actor: &'a str,
    pub action: Action,
    pub previous_state: Option<TaskState>,
    pub new_state: TaskState,
    pub comment: Option<&'a str>,
    pub timestamp: i64,
}

fn parse_history_row(row: &Row) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        project_id: row.get("project_id")?,
        task_id: row.get("task_id")?,
        sequence_no: row.get("sequence_no")?,
        actor: row.get("actor")?,
        action: row.get("action")?,
        previous_state: row.get("previous_state")?,
        new_state: row.get("new_state")?,
        comment: row.get("comment")?,
        timestamp: row.get("timestamp")?,
    })
}

/// Append one entry. Must run in the same transaction as the state change it
/// records so that neither is written without the other.
pub(crate) fn append_entry(conn: &Connection, entry: NewEntry<'_>) -> TaskResult<HistoryEntry> {
    if !state_machine::permits(entry.action, entry.previous_state, entry.new_state) {
        return Err(TaskError::internal(format!(
            "refusing to record illegal {} edge {:?} -> {} on task {}",
            entry.action, entry.previous_state, entry.new_state, entry.task_id
        )));
    }

    let sequence_no: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence_no), 0) + 1 FROM task_history
         WHERE project_id = ?1 AND task_id = ?2",
        params![entry.project_id, entry.task_id],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO task_history
         (project_id, task_id, sequence_no, actor, action, previous_state, new_state, comment, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.project_id,
            entry.task_id,
            sequence_no,
            entry.actor,
            entry.action,
            entry.previous_state,
            entry.new_state,
            entry.comment,
            entry.timestamp,
        ],
    )?;

    Ok(HistoryEntry {
        project_id: entry.project_id,
        task_id: entry.task_id,
        sequence_no,
        actor: entry.actor.to_string(),
        action: entry.action,
        previous_state: entry.previous_state,
        new_state: entry.new_state,
        comment: entry.comment.map(str::to_string),
        timestamp: entry.timestamp,
    })
}

pub(crate) fn entries_for_task(
    conn: &Connection,
    project_id: ProjectId,
    task_id: TaskId,
) -> TaskResult<Vec<HistoryEntry>> {
    let sql = format!(
        "SELECT {HISTORY_COLUMNS} FROM task_history
         WHERE project_id = ?1 AND task_id = ?2 ORDER BY sequence_no ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![project_id, task_id], parse_history_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// The most recent entry for a task.
pub(crate) fn last_entry(
    conn: &Connection,
    project_id: ProjectId,
    task_id: TaskId,
) -> TaskResult<Option<HistoryEntry>> {
    let sql = format!(
        "SELECT {HISTORY_COLUMNS} FROM task_history
         WHERE project_id = ?1 AND task_id = ?2 ORDER BY sequence_no DESC LIMIT 1"
    );
    let entry = conn
        .query_row(&sql, params![project_id, task_id], parse_history_row)
        .optional()?;
    Ok(entry)
}

/// The most recent entry of the given action for a task.
pub(crate) fn last_entry_of(
    conn: &Connection,
    project_id: ProjectId,
    task_id: TaskId,
    action: Action,
) -> TaskResult<Option<HistoryEntry>> {
    let sql = format!(
        "SELECT {HISTORY_COLUMNS} FROM task_history
         WHERE project_id = ?1 AND task_id = ?2 AND action = ?3
         ORDER BY sequence_no DESC LIMIT 1"
    );
    let entry = conn
        .query_row(&sql, params![project_id, task_id, action], parse_history_row)
        .optional()?;
    Ok(entry)
}

/// A ledger that does not describe a legal walk through the state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryViolation {
    #[error("entry {found} follows entry {previous}; sequence numbers must be consecutive")]
    SequenceGap { previous: i64, found: i64 },

    #[error("entry {sequence_no} starts from {recorded:?} but the task was {actual:?}")]
    Discontinuity {
        sequence_no: i64,
        recorded: Option<TaskState>,
        actual: Option<TaskState>,
    },

    #[error("entry {sequence_no} records illegal {action} edge {from:?} -> {to}")]
    IllegalEdge {
        sequence_no: i64,
        action: Action,
        from: Option<TaskState>,
        to: TaskState,
    },
}

/// Check that a task's ordered history is a legal, unbroken walk starting
/// from its creation marker.
pub fn verify_history(entries: &[HistoryEntry]) -> Result<(), HistoryViolation> {
    let mut state: Option<TaskState> = None;
    let mut last_seq = 0;

    for entry in entries {
        if entry.sequence_no != last_seq + 1 {
            return Err(HistoryViolation::SequenceGap {
                previous: last_seq,
                found: entry.sequence_no,
            });
        }
        if entry.previous_state != state {
            return Err(HistoryViolation::Discontinuity {
                sequence_no: entry.sequence_no,
                recorded: entry.previous_state,
                actual: state,
            });
        }
        if !state_machine::permits(entry.action, entry.previous_state, entry.new_state) {
            return Err(HistoryViolation::IllegalEdge {
                sequence_no: entry.sequence_no,
                action: entry.action,
                from: entry.previous_state,
                to: entry.new_state,
            });
        }
        state = Some(entry.new_state);
        last_seq = entry.sequence_no;
    }

    Ok(())
}

/// State reached by folding a task's history from its creation marker,
/// `None` for an empty ledger. Each entry must start where the previous one
/// ended.
pub fn replay_history(entries: &[HistoryEntry]) -> Result<Option<TaskState>, HistoryViolation> {
    entries.iter().try_fold(None, |state, entry| {
        if entry.previous_state != state {
            return Err(HistoryViolation::Discontinuity {
                sequence_no: entry.sequence_no,
                recorded: entry.previous_state,
                actual: state,
            });
        }
        Ok(Some(entry.new_state))
    })
}

impl Database {
    /// Ordered history of a task, oldest first.
    pub fn task_history(&self, project_id: ProjectId, task_id: TaskId) -> TaskResult<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            super::tasks::require_task(conn, project_id, task_id)?;
            entries_for_task(conn, project_id, task_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: i64, action: Action, from: Option<TaskState>, to: TaskState) -> HistoryEntry {
        HistoryEntry {
            project_id: 1,
            task_id: 1,
            sequence_no: seq,
            actor: "a".into(),
            action,
            previous_state: from,
            new_state: to,
            comment: None,
            timestamp: seq,
        }
    }

    #[test]
    fn verify_accepts_a_mapping_round() {
        use TaskState::*;
        let entries = vec![
            entry(1, Action::Created, None, Ready),
            entry(2, Action::LockForMapping, Some(Ready), LockedForMapping),
            entry(3, Action::MarkMapped, Some(LockedForMapping), Mapped),
        ];
        assert_eq!(verify_history(&entries), Ok(()));
        assert_eq!(replay_history(&entries), Ok(Some(Mapped)));
        assert_eq!(replay_history(&[]), Ok(None));
    }

    #[test]
    fn verify_rejects_broken_chain() {
        use TaskState::*;
        let entries = vec![
            entry(1, Action::Created, None, Ready),
            entry(2, Action::LockForValidation, Some(Mapped), LockedForValidation),
        ];
        assert!(matches!(
            verify_history(&entries),
            Err(HistoryViolation::Discontinuity { sequence_no: 2, .. })
        ));
        assert!(matches!(
            replay_history(&entries),
            Err(HistoryViolation::Discontinuity { sequence_no: 2, .. })
        ));
    }

    #[test]
    fn verify_rejects_illegal_edge() {
        use TaskState::*;
        let entries = vec![
            entry(1, Action::Created, None, Ready),
            entry(2, Action::Validate, Some(Ready), Validated),
        ];
        assert!(matches!(
            verify_history(&entries),
            Err(HistoryViolation::IllegalEdge { sequence_no: 2, .. })
        ));
    }

    #[test]
    fn ledger_rows_cannot_be_edited() {
        let db = Database::open_in_memory().unwrap();
        let project = db.create_project("p").unwrap();
        db.add_task(project.id, "1/0/0", "pm").unwrap();

        let update = db.with_conn(|conn| {
            conn.execute("UPDATE task_history SET actor = 'mallory'", [])?;
            Ok(())
        });
        assert!(update.is_err());

        let delete = db.with_conn(|conn| {
            conn.execute("DELETE FROM task_history", [])?;
            Ok(())
        });
        assert!(delete.is_err());

        assert_eq!(db.task_history(project.id, 1).unwrap().len(), 1);
    }
}
