//! Record linkage: module types, record references and user identifiers

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ApprovalError;

// ── Module Type ──────────────────────────────────────────────────────

/// The kind of business record an approval or todo is attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Contract,
    Opportunity,
    Expense,
    Quotation,
    PurchaseOrder,
    Payment,
    Project,
    Inventory,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::Opportunity => "opportunity",
            Self::Expense => "expense",
            Self::Quotation => "quotation",
            Self::PurchaseOrder => "purchase_order",
            Self::Payment => "payment",
            Self::Project => "project",
            Self::Inventory => "inventory",
        }
    }

    pub fn all() -> [ModuleType; 8] {
        [
            Self::Contract,
            Self::Opportunity,
            Self::Expense,
            Self::Quotation,
            Self::PurchaseOrder,
            Self::Payment,
            Self::Project,
            Self::Inventory,
        ]
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ApprovalError::UnknownModuleType(s.to_string()))
    }
}

// ── Record Reference ─────────────────────────────────────────────────

/// Tagged reference to a record owned by an external record store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub module_type: ModuleType,
    pub module_id: u64,
}

impl RecordRef {
    pub fn new(module_type: ModuleType, module_id: u64) -> Self {
        Self {
            module_type,
            module_id,
        }
    }
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.module_type, self.module_id)
    }
}

// ── User Identifier ──────────────────────────────────────────────────

/// Identifier of a user in the identity directory
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
