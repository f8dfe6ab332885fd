//! Definition registry: stores, validates and selects workflow definitions
//!
//! Definitions are versioned. Editing one bumps its version but never
//! touches running instances, which carry a snapshot of the steps they
//! started with.

use approval_store::ApprovalStore;
use approval_types::{
    ApprovalError, ApprovalResult, ModuleType, WorkflowDefinition, WorkflowDefinitionId,
};
use chrono::Utc;
use std::cmp::Reverse;
use std::sync::Arc;

/// Registry of workflow definitions backed by the approval store
#[derive(Clone)]
pub struct DefinitionRegistry {
    store: Arc<dyn ApprovalStore>,
}

impl DefinitionRegistry {
    pub fn new(store: Arc<dyn ApprovalStore>) -> Self {
        Self { store }
    }

    /// Validate and persist a new definition. The store assigns the id.
    pub async fn define(
        &self,
        mut definition: WorkflowDefinition,
    ) -> ApprovalResult<WorkflowDefinition> {
        definition.validate()?;
        let now = Utc::now();
        definition.created_at = now;
        definition.updated_at = now;

        let stored = self.store.insert_definition(definition).await?;
        tracing::info!(
            definition_id = %stored.id,
            module_type = %stored.module_type,
            priority = stored.priority,
            "Workflow definition registered"
        );
        Ok(stored)
    }

    /// Replace the editable parts of a definition and bump its version.
    /// The active flag is kept; use [`set_active`](Self::set_active) for that.
    pub async fn update(
        &self,
        id: WorkflowDefinitionId,
        mut definition: WorkflowDefinition,
    ) -> ApprovalResult<WorkflowDefinition> {
        let existing = self.get(id).await?;
        definition.id = id;
        definition.active = existing.active;
        definition.validate()?;
        definition.updated_at = Utc::now();

        let stored = self
            .store
            .update_definition(definition, existing.version)
            .await?;
        tracing::info!(
            definition_id = %stored.id,
            version = stored.version,
            "Workflow definition updated"
        );
        Ok(stored)
    }

    pub async fn set_active(
        &self,
        id: WorkflowDefinitionId,
        active: bool,
    ) -> ApprovalResult<WorkflowDefinition> {
        let mut definition = self.get(id).await?;
        if definition.active == active {
            return Ok(definition);
        }
        let expected = definition.version;
        definition.active = active;
        definition.updated_at = Utc::now();

        let stored = self.store.update_definition(definition, expected).await?;
        tracing::info!(definition_id = %stored.id, active, "Workflow definition toggled");
        Ok(stored)
    }

    pub async fn deactivate(&self, id: WorkflowDefinitionId) -> ApprovalResult<WorkflowDefinition> {
        self.set_active(id, false).await
    }

    pub async fn activate(&self, id: WorkflowDefinitionId) -> ApprovalResult<WorkflowDefinition> {
        self.set_active(id, true).await
    }

    pub async fn get(&self, id: WorkflowDefinitionId) -> ApprovalResult<WorkflowDefinition> {
        self.store
            .get_definition(id)
            .await?
            .ok_or(ApprovalError::DefinitionNotFound(id))
    }

    pub async fn list(
        &self,
        module_type: Option<ModuleType>,
    ) -> ApprovalResult<Vec<WorkflowDefinition>> {
        Ok(self.store.list_definitions(module_type).await?)
    }

    /// Active definitions for a module type, ordered by id
    pub async fn find_active_definitions(
        &self,
        module_type: ModuleType,
    ) -> ApprovalResult<Vec<WorkflowDefinition>> {
        let mut definitions = self.list(Some(module_type)).await?;
        definitions.retain(|d| d.active);
        Ok(definitions)
    }

    /// The definition a record of `module_type` worth `amount` must go
    /// through, or `None` when it should be auto-approved
    pub async fn select_matching(
        &self,
        module_type: ModuleType,
        amount: f64,
    ) -> ApprovalResult<Option<WorkflowDefinition>> {
        let candidates = self.find_active_definitions(module_type).await?;
        Ok(select_from(&candidates, module_type, amount).cloned())
    }
}

/// Pick among candidate definitions: active, same module type, bounds
/// containing `amount`; highest priority wins, then the lowest id.
pub fn select_from(
    candidates: &[WorkflowDefinition],
    module_type: ModuleType,
    amount: f64,
) -> Option<&WorkflowDefinition> {
    candidates
        .iter()
        .filter(|d| d.active && d.matches(module_type, amount))
        .max_by_key(|d| (d.priority, Reverse(d.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_store::memory::InMemoryApprovalStore;
    use approval_types::{AmountConditions, ApprovalMode, ApproverSpec};

    fn make_registry() -> DefinitionRegistry {
        DefinitionRegistry::new(Arc::new(InMemoryApprovalStore::new()))
    }

    fn expense(name: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(name, ModuleType::Expense).with_step(
            "Manager",
            ApproverSpec::roles(["manager"]),
            ApprovalMode::Any,
        )
    }

    #[tokio::test]
    async fn test_define_validates() {
        let registry = make_registry();
        let empty = WorkflowDefinition::new("Empty", ModuleType::Expense);
        assert!(matches!(
            registry.define(empty).await,
            Err(ApprovalError::InvalidDefinition(_))
        ));

        let blank_users = WorkflowDefinition::new("Blank", ModuleType::Expense).with_step(
            "Nobody",
            ApproverSpec::User(vec![]),
            ApprovalMode::Any,
        );
        assert!(matches!(
            registry.define(blank_users).await,
            Err(ApprovalError::InvalidDefinition(_))
        ));
    }

    #[tokio::test]
    async fn test_selection_prefers_priority_then_lowest_id() {
        let registry = make_registry();
        let low = registry
            .define(expense("Low").with_priority(1))
            .await
            .unwrap();
        let high_a = registry
            .define(expense("High A").with_priority(5))
            .await
            .unwrap();
        let _high_b = registry
            .define(expense("High B").with_priority(5))
            .await
            .unwrap();

        let selected = registry
            .select_matching(ModuleType::Expense, 10.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, high_a.id);

        registry.deactivate(high_a.id).await.unwrap();
        let selected = registry
            .select_matching(ModuleType::Expense, 10.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.name, "High B");

        registry.deactivate(selected.id).await.unwrap();
        let selected = registry
            .select_matching(ModuleType::Expense, 10.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.id, low.id);
    }

    #[tokio::test]
    async fn test_selection_respects_inclusive_bounds() {
        let registry = make_registry();
        registry
            .define(
                expense("Large")
                    .with_priority(10)
                    .with_conditions(AmountConditions::at_least(1_000.0)),
            )
            .await
            .unwrap();
        registry
            .define(expense("Small").with_conditions(AmountConditions::between(0.0, 999.99)))
            .await
            .unwrap();

        let at_bound = registry
            .select_matching(ModuleType::Expense, 1_000.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_bound.name, "Large");

        let small = registry
            .select_matching(ModuleType::Expense, 120.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(small.name, "Small");

        assert!(registry
            .select_matching(ModuleType::Contract, 120.0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_keeps_active_flag() {
        let registry = make_registry();
        let def = registry.define(expense("Travel")).await.unwrap();
        registry.deactivate(def.id).await.unwrap();

        let edited = expense("Travel v2").with_priority(3);
        let updated = registry.update(def.id, edited).await.unwrap();
        assert_eq!(updated.id, def.id);
        assert_eq!(updated.version, 3);
        assert_eq!(updated.name, "Travel v2");
        assert!(!updated.active);

        let missing = registry
            .update(WorkflowDefinitionId::new(99), expense("Ghost"))
            .await;
        assert!(matches!(
            missing,
            Err(ApprovalError::DefinitionNotFound(_))
        ));
    }
}
