//! Database layer: task entity store, history ledger and lock manager.

pub mod history;
pub mod locks;
pub mod queries;
pub mod tasks;
pub mod transitions;

use crate::error::{TaskError, TaskResult};
use crate::types::{Action, HistoryEntry, TaskState};
use anyhow::{Result, anyhow};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
///
/// Clones share one connection. Independent workers open their own handle on
/// the same file; version-guarded updates keep them consistent.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets readers proceed while a writer commits
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))?;
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    fn lock(&self) -> TaskResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TaskError::internal("database connection mutex poisoned"))
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> TaskResult<T>
    where
        F: FnOnce(&Connection) -> TaskResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction.
    ///
    /// Commits when `f` succeeds and rolls back otherwise. Returns the value
    /// together with the history entries written, in order, so callers can
    /// publish them once the commit is durable.
    pub fn with_tx<F, T>(&self, f: F) -> TaskResult<(T, Vec<HistoryEntry>)>
    where
        F: FnOnce(&mut Unit<'_>) -> TaskResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut unit = Unit::new(&tx);
        let value = f(&mut unit)?;
        let entries = unit.into_entries();
        tx.commit()?;
        Ok((value, entries))
    }
}

/// One open transaction plus the ledger entries it has appended.
pub struct Unit<'a> {
    tx: &'a Transaction<'a>,
    now: i64,
    entries: Vec<HistoryEntry>,
}

impl<'a> Unit<'a> {
    fn new(tx: &'a Transaction<'a>) -> Self {
        Self {
            tx,
            now: now_ms(),
            entries: Vec::new(),
        }
    }

    pub fn conn(&self) -> &Connection {
        self.tx
    }

    /// Timestamp shared by every write in this transaction.
    pub fn now(&self) -> i64 {
        self.now
    }

    pub(crate) fn push_entry(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ToSql for TaskState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Action {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Action {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
