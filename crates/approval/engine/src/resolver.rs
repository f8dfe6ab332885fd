//! Approver resolution
//!
//! Turns an approver spec into the concrete set of users who must act.
//! Roles are expanded at activation time, so membership changes apply to
//! the next activation and never retroactively. Deactivated users are
//! always filtered out.

use crate::directory::IdentityDirectory;
use approval_types::{ApprovalError, ApprovalResult, ApproverSpec, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Resolves approver specs against the identity directory
#[derive(Clone)]
pub struct ApproverResolver {
    directory: Arc<dyn IdentityDirectory>,
}

impl ApproverResolver {
    pub fn new(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve a spec to a non-empty set of active users.
    ///
    /// Fails with `UnresolvableApprovers` when no active user remains.
    pub async fn resolve(&self, spec: &ApproverSpec) -> ApprovalResult<BTreeSet<UserId>> {
        let candidates = match spec {
            ApproverSpec::Role(roles) => {
                let mut candidates = BTreeSet::new();
                for role in roles {
                    candidates.extend(self.directory.users_with_role(role).await?);
                }
                candidates
            }
            ApproverSpec::User(users) => users.iter().cloned().collect(),
        };

        let resolved = self.active_only(candidates).await?;
        if resolved.is_empty() {
            return Err(ApprovalError::UnresolvableApprovers(describe(spec)));
        }
        tracing::debug!(approvers = resolved.len(), "Approvers resolved");
        Ok(resolved)
    }

    /// Resolve an explicit override list, as used by step reassignment
    pub async fn resolve_users(&self, users: &[UserId]) -> ApprovalResult<BTreeSet<UserId>> {
        self.resolve(&ApproverSpec::User(users.to_vec())).await
    }

    async fn active_only(&self, candidates: BTreeSet<UserId>) -> ApprovalResult<BTreeSet<UserId>> {
        let mut active = BTreeSet::new();
        for user in candidates {
            if self.directory.is_active(&user).await? {
                active.insert(user);
            }
        }
        Ok(active)
    }
}

fn describe(spec: &ApproverSpec) -> String {
    match spec {
        ApproverSpec::Role(roles) => format!("no active user holds role(s) {}", roles.join(", ")),
        ApproverSpec::User(users) => format!(
            "none of the users {} is active",
            users
                .iter()
                .map(UserId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
