//! Configuration loading and management.

use crate::types::Role;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Project-local configuration file.
pub const PROJECT_CONFIG_PATH: &str = ".tasking/config.yaml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub locking: LockingConfig,

    #[serde(default)]
    pub users: UsersConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".tasking/tasks.db")
}

/// Lock expiry policy.
///
/// Expired locks are never cleared in the background. They only become
/// eligible for release when a request touches them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    /// Age in seconds after which a lock counts as stale.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: i64,

    /// Let a lock request of the same kind take over a stale lock.
    #[serde(default = "default_reclaim_stale")]
    pub reclaim_stale_locks: bool,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            lock_ttl_seconds: default_lock_ttl(),
            reclaim_stale_locks: default_reclaim_stale(),
        }
    }
}

fn default_lock_ttl() -> i64 {
    7200 // 2 hours
}

fn default_reclaim_stale() -> bool {
    true
}

impl LockingConfig {
    pub fn ttl_ms(&self) -> i64 {
        self.lock_ttl_seconds.saturating_mul(1000)
    }
}

/// Static user directory used when no external directory is wired in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersConfig {
    /// Role assumed for actors not listed in `roles`. Unset means unknown
    /// actors are refused.
    #[serde(default)]
    pub default_role: Option<Role>,

    #[serde(default)]
    pub roles: HashMap<String, Role>,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from default locations or return defaults, then
    /// apply environment overrides.
    pub fn load_or_default() -> Self {
        let mut config = Self::default_locations()
            .into_iter()
            .find_map(|path| match Self::load(&path) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded configuration");
                    Some(config)
                }
                Err(_) => None,
            })
            .unwrap_or_default();

        config.apply_env();
        config
    }

    /// Candidate config files, highest priority first.
    fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(PROJECT_CONFIG_PATH)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("tasking").join("config.yaml"));
        }
        paths
    }

    /// Apply `TASKING_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(db_path) = std::env::var("TASKING_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Ok(ttl) = std::env::var("TASKING_LOCK_TTL")
            && let Ok(ttl) = ttl.parse()
        {
            self.locking.lock_ttl_seconds = ttl;
        }

        if let Ok(reclaim) = std::env::var("TASKING_RECLAIM_STALE_LOCKS")
            && let Ok(reclaim) = reclaim.parse()
        {
            self.locking.reclaim_stale_locks = reclaim;
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
