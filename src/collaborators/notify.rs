//! Notification sink for committed transitions.
//!
//! Events are emitted after the transaction commits. Delivery is
//! fire-and-forget: a failing sink is logged and never rolls back the
//! transition it reports.

use crate::types::HistoryEntry;
use anyhow::{Result, anyhow};
use std::sync::Mutex;
use tracing::info;

/// Receives one event per committed history entry.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &HistoryEntry) -> Result<()>;
}

/// Sink that writes events to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: &HistoryEntry) -> Result<()> {
        info!(
            target: "tasking::events",
            project_id = event.project_id,
            task_id = event.task_id,
            actor = %event.actor,
            action = %event.action,
            previous_state = ?event.previous_state,
            new_state = %event.new_state,
            "Task transition"
        );
        Ok(())
    }
}

/// Sink that keeps events in memory, for embedding and tests.
///
/// Thread-safe: uses an internal `Mutex` so it can be shared across workers.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<HistoryEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event received so far.
    pub fn events(&self) -> Vec<HistoryEntry> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Drain the received events.
    pub fn take(&self) -> Vec<HistoryEntry> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

impl NotificationSink for MemorySink {
    fn notify(&self, event: &HistoryEntry) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow!("event buffer mutex poisoned"))?;
        events.push(event.clone());
        Ok(())
    }
}
