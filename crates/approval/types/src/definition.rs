//! Workflow definitions: the ordered list of approval steps for a module
//!
//! A definition is selected for a record when it is active, belongs to the
//! record's module type, and its amount conditions contain the record's
//! amount. Among several matches the highest priority wins, ties going to
//! the lowest id.

use crate::{ApprovalError, ApprovalResult, ModuleType, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────

/// Identifier of a workflow definition, assigned sequentially by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowDefinitionId(pub u64);

impl WorkflowDefinitionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Placeholder id for a definition that has not been stored yet
    pub fn unassigned() -> Self {
        Self(0)
    }

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// A named approval workflow for one module type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub module_type: ModuleType,
    /// Steps in execution order; `steps[i].ordinal == i`
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub conditions: AmountConditions,
    /// Higher wins among definitions matching the same record
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Incremented on every stored update
    #[serde(default = "default_version")]
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Create a new, empty, active definition
    pub fn new(name: impl Into<String>, module_type: ModuleType) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowDefinitionId::unassigned(),
            name: name.into(),
            description: String::new(),
            module_type,
            steps: Vec::new(),
            conditions: AmountConditions::unbounded(),
            priority: 0,
            active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_conditions(mut self, conditions: AmountConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Append a step; its ordinal is set to its position
    pub fn with_step(
        mut self,
        name: impl Into<String>,
        approver_spec: ApproverSpec,
        approval_mode: ApprovalMode,
    ) -> Self {
        let ordinal = self.steps.len();
        self.steps.push(WorkflowStep {
            ordinal,
            name: name.into(),
            approver_spec,
            approval_mode,
        });
        self
    }

    /// Get a step by ordinal
    pub fn step(&self, index: usize) -> Option<&WorkflowStep> {
        self.steps.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Check whether this definition applies to a record of the given
    /// module type and amount
    pub fn matches(&self, module_type: ModuleType, amount: f64) -> bool {
        self.active && self.module_type == module_type && self.conditions.contains(amount)
    }

    /// Validate the definition for structural correctness
    pub fn validate(&self) -> ApprovalResult<()> {
        if self.name.trim().is_empty() {
            return Err(ApprovalError::InvalidDefinition(
                "Workflow name must not be empty".into(),
            ));
        }

        if self.steps.is_empty() {
            return Err(ApprovalError::InvalidDefinition(
                "Workflow must have at least one step".into(),
            ));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.ordinal != index {
                return Err(ApprovalError::InvalidDefinition(format!(
                    "Step '{}' has ordinal {} but sits at position {}",
                    step.name, step.ordinal, index
                )));
            }
            step.approver_spec.validate().map_err(|reason| {
                ApprovalError::InvalidDefinition(format!("Step '{}': {}", step.name, reason))
            })?;
        }

        self.conditions.validate()?;

        Ok(())
    }
}

// ── Workflow Step ────────────────────────────────────────────────────

/// One stage of a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// 0-based position in the definition
    pub ordinal: usize,
    pub name: String,
    pub approver_spec: ApproverSpec,
    pub approval_mode: ApprovalMode,
}

/// Who must act on a step: role names or explicit users, never both
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ApproverSpec {
    Role(Vec<String>),
    User(Vec<UserId>),
}

impl ApproverSpec {
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Role(roles.into_iter().map(Into::into).collect())
    }

    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::User(users.into_iter().map(UserId::new).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Role(roles) => roles.is_empty(),
            Self::User(users) => users.is_empty(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Role(roles) => {
                if roles.is_empty() {
                    return Err("approver spec must list at least one role".into());
                }
                if roles.iter().any(|r| r.trim().is_empty()) {
                    return Err("role names must not be blank".into());
                }
            }
            Self::User(users) => {
                if users.is_empty() {
                    return Err("approver spec must list at least one user".into());
                }
                if users.iter().any(|u| u.0.trim().is_empty()) {
                    return Err("user ids must not be blank".into());
                }
            }
        }
        Ok(())
    }
}

/// How the decisions of a step's actors combine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// The first decision is authoritative
    #[default]
    Any,
    /// Every resolved actor must approve
    All,
}

// ── Conditions ───────────────────────────────────────────────────────

/// Inclusive amount bounds; an absent bound is unbounded on that side
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct AmountConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl AmountConditions {
    pub fn unbounded() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub fn contains(&self, amount: f64) -> bool {
        self.min.map_or(true, |min| amount >= min) && self.max.map_or(true, |max| amount <= max)
    }

    fn validate(&self) -> ApprovalResult<()> {
        for bound in [self.min, self.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(ApprovalError::InvalidDefinition(
                    "Amount bounds must be finite numbers".into(),
                ));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(ApprovalError::InvalidDefinition(format!(
                    "Minimum amount {} exceeds maximum amount {}",
                    min, max
                )));
            }
        }
        Ok(())
    }
}
