//! Task locking and state-transition core for collaborative mapping projects.
//!
//! This module exports the core components for request handlers, the CLI and
//! tests.

pub mod actions;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod logging;
pub mod state_machine;
pub mod types;

pub use actions::TaskManager;
pub use db::Database;
pub use error::{ErrorCode, TaskError, TaskResult};
