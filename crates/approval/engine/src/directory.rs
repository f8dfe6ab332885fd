//! Identity directory: who holds which role, and who is still active

use approval_types::{ApprovalError, ApprovalResult, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Read-only view of the identity/role directory
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Every user currently holding `role`, active or not
    async fn users_with_role(&self, role: &str) -> ApprovalResult<Vec<UserId>>;

    /// Whether the user exists and is active
    async fn is_active(&self, user: &UserId) -> ApprovalResult<bool>;
}

/// A directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: UserId,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl DirectoryUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            roles: Vec::new(),
            active: true,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// In-memory directory, used by the daemon and in tests
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<UserId, DirectoryUser>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_users(users: impl IntoIterator<Item = DirectoryUser>) -> Self {
        let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Insert or replace a user
    pub fn upsert(&self, user: DirectoryUser) -> ApprovalResult<()> {
        let mut guard = self
            .users
            .write()
            .map_err(|_| ApprovalError::Storage("directory lock poisoned".to_string()))?;
        guard.insert(user.id.clone(), user);
        Ok(())
    }

    pub fn set_active(&self, user: &UserId, active: bool) -> ApprovalResult<()> {
        let mut guard = self
            .users
            .write()
            .map_err(|_| ApprovalError::Storage("directory lock poisoned".to_string()))?;
        if let Some(entry) = guard.get_mut(user) {
            entry.active = active;
        }
        Ok(())
    }

    pub fn grant_role(&self, user: &UserId, role: &str) -> ApprovalResult<()> {
        let mut guard = self
            .users
            .write()
            .map_err(|_| ApprovalError::Storage("directory lock poisoned".to_string()))?;
        let entry = guard
            .entry(user.clone())
            .or_insert_with(|| DirectoryUser::new(user.as_str()));
        if !entry.roles.iter().any(|r| r == role) {
            entry.roles.push(role.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn users_with_role(&self, role: &str) -> ApprovalResult<Vec<UserId>> {
        let guard = self
            .users
            .read()
            .map_err(|_| ApprovalError::Storage("directory lock poisoned".to_string()))?;
        let mut users = guard
            .values()
            .filter(|u| u.roles.iter().any(|r| r == role))
            .map(|u| u.id.clone())
            .collect::<Vec<_>>();
        users.sort();
        Ok(users)
    }

    async fn is_active(&self, user: &UserId) -> ApprovalResult<bool> {
        let guard = self
            .users
            .read()
            .map_err(|_| ApprovalError::Storage("directory lock poisoned".to_string()))?;
        Ok(guard.get(user).is_some_and(|u| u.active))
    }
}
