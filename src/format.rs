//! Output formatting utilities for markdown and JSON.

use crate::db::queries::MappedByUser;
use crate::types::{BulkActionResult, HistoryEntry, Task, TaskState, UserTaskActivity};
use anyhow::Result;
use serde::Serialize;

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// Render `value` as pretty JSON or through `markdown`.
pub fn render<T, F>(format: OutputFormat, value: &T, markdown: F) -> Result<String>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Markdown => Ok(markdown(value)),
    }
}

/// Millisecond timestamp as RFC 3339, or the raw number if out of range.
pub fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

/// Format a single task as markdown.
pub fn format_task_markdown(task: &Task) -> String {
    let mut md = String::new();

    md.push_str(&format!("## Task {}\n", task.task_id));
    md.push_str(&format!("- **project**: {}\n", task.project_id));
    md.push_str(&format!("- **state**: {}\n", task.state));
    md.push_str(&format!("- **geometry**: `{}`\n", task.geometry_ref));

    if let Some(ref holder) = task.locked_by {
        md.push_str(&format!("- **locked_by**: {}\n", holder));
    }
    if let Some(acquired) = task.lock_acquired_at {
        md.push_str(&format!("- **locked_at**: {}\n", format_timestamp(acquired)));
    }
    if let Some(ref mapper) = task.mapped_by {
        md.push_str(&format!("- **mapped_by**: {}\n", mapper));
    }
    if let Some(ref validator) = task.validated_by {
        md.push_str(&format!("- **validated_by**: {}\n", validator));
    }
    if let Some(parent) = task.parent_task_id {
        md.push_str(&format!("- **parent**: {}\n", parent));
    }
    md.push_str(&format!("- **version**: {}\n", task.version));

    md
}

/// Format a list of tasks as markdown, grouped by state.
pub fn format_tasks_markdown(tasks: &[Task]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Tasks ({})\n\n", tasks.len()));

    for state in TaskState::ALL {
        let in_state: Vec<&Task> = tasks.iter().filter(|t| t.state == state).collect();
        if in_state.is_empty() {
            continue;
        }
        md.push_str(&format!("## {} ({})\n\n", state, in_state.len()));
        for task in in_state {
            md.push_str(&format_task_short(task));
        }
        md.push('\n');
    }

    md
}

/// Format a task in short form for lists.
fn format_task_short(task: &Task) -> String {
    let holder = task
        .locked_by
        .as_ref()
        .map(|h| format!(" @{}", h))
        .unwrap_or_default();

    format!(
        "- {}/{} `{}`{}\n",
        task.project_id, task.task_id, task.geometry_ref, holder
    )
}

/// Format a task's history as a markdown table.
pub fn format_history_markdown(entries: &[HistoryEntry]) -> String {
    let mut md = String::new();

    md.push_str("| # | time | actor | action | from | to | comment |\n");
    md.push_str("|---|------|-------|--------|------|----|---------|\n");
    for entry in entries {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            entry.sequence_no,
            format_timestamp(entry.timestamp),
            entry.actor,
            entry.action,
            entry
                .previous_state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into()),
            entry.new_state,
            entry.comment.as_deref().unwrap_or(""),
        ));
    }

    md
}

/// Format a bulk result as one line per task.
pub fn format_bulk_markdown(result: &BulkActionResult) -> String {
    let mut md = String::new();

    md.push_str(&format!(
        "# {} ({} of {} applied)\n\n",
        result.action,
        result.applied_count(),
        result.outcomes.len()
    ));
    for (task_id, outcome) in &result.outcomes {
        md.push_str(&format!("- {}: {}\n", task_id, outcome));
    }

    md
}

pub fn format_mapped_by_user_markdown(groups: &[MappedByUser]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Mapped tasks by user ({})\n\n", groups.len()));
    for group in groups {
        let ids: Vec<String> = group.task_ids.iter().map(|id| id.to_string()).collect();
        md.push_str(&format!(
            "- **{}**: {} (last {})\n",
            group.mapped_by,
            ids.join(", "),
            format_timestamp(group.last_mapped_at)
        ));
    }

    md
}

pub fn format_activity_markdown(activity: &[UserTaskActivity]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Activity ({})\n\n", activity.len()));
    for item in activity {
        md.push_str(&format!(
            "- {} {}/{} {}\n",
            format_timestamp(item.action_date),
            item.task.project_id,
            item.task.task_id,
            item.task.state
        ));
    }

    md
}
