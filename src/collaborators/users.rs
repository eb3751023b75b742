//! User directory seam: who an actor is and what they may do.

use crate::config::UsersConfig;
use crate::types::Role;
use std::collections::HashMap;

/// Resolves actor identities to permission levels.
pub trait UserDirectory: Send + Sync {
    /// `None` means the actor is unknown and must be refused.
    fn role(&self, actor: &str) -> Option<Role>;
}

/// Directory backed by a fixed role table.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    roles: HashMap<String, Role>,
    default_role: Option<Role>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, actor: impl Into<String>, role: Role) -> Self {
        self.roles.insert(actor.into(), role);
        self
    }

    /// Role for actors not listed explicitly.
    pub fn with_default_role(mut self, role: Role) -> Self {
        self.default_role = Some(role);
        self
    }
}

impl From<&UsersConfig> for StaticDirectory {
    fn from(config: &UsersConfig) -> Self {
        Self {
            roles: config.roles.clone(),
            default_role: config.default_role,
        }
    }
}

impl UserDirectory for StaticDirectory {
    fn role(&self, actor: &str) -> Option<Role> {
        self.roles.get(actor).copied().or(self.default_role)
    }
}
