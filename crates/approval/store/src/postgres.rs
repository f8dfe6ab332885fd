//! PostgreSQL adapter for approval storage.
//!
//! Records are kept as JSONB documents next to the columns needed for
//! lookups and compare-and-set. The `version` column is authoritative and
//! overrides whatever version the document carries. A partial unique index
//! enforces one active instance per record.

use crate::model::{ChangeSet, Versioned};
use crate::traits::{ChangeStore, DefinitionStore, InstanceStore, TodoStore};
use crate::{StorageError, StorageResult};
use approval_types::{
    ApprovalInstance, ApprovalInstanceId, HistoryAppend, HistoryEntry, InstanceStatus, ModuleType,
    PendingOutcome, RecordRef, StepExecution, StepExecutionId, TaskToken, Todo, TodoId,
    TodoStatus, UserId, WorkflowDefinition, WorkflowDefinitionId,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

const ACTIVE_RECORD_INDEX: &str = "approval_instances_active_record";

/// PostgreSQL-backed approval storage adapter.
#[derive(Clone)]
pub struct PostgresApprovalStore {
    pool: PgPool,
}

impl PostgresApprovalStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS approval_definitions (
                id BIGSERIAL PRIMARY KEY,
                module_type TEXT NOT NULL,
                version INTEGER NOT NULL,
                document JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_instances (
                id TEXT PRIMARY KEY,
                module_type TEXT NOT NULL,
                module_id BIGINT NOT NULL,
                status TEXT NOT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS approval_instances_active_record
                ON approval_instances (module_type, module_id)
                WHERE status IN ('running', 'returned_pending', 'escalation_needed')
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_step_executions (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL REFERENCES approval_instances (id),
                open BOOLEAN NOT NULL,
                version BIGINT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_todos (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                instance_id TEXT,
                task_token TEXT UNIQUE,
                status TEXT NOT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS approval_todos_owner ON approval_todos (owner_id, status)",
            r#"
            CREATE TABLE IF NOT EXISTS approval_history (
                instance_id TEXT NOT NULL REFERENCES approval_instances (id),
                sequence BIGINT NOT NULL,
                document JSONB NOT NULL,
                PRIMARY KEY (instance_id, sequence)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS approval_pending_outcomes (
                instance_id TEXT PRIMARY KEY REFERENCES approval_instances (id),
                resolved_at TIMESTAMPTZ NOT NULL,
                document JSONB NOT NULL
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn active_instance_id(&self, record: RecordRef) -> StorageResult<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM approval_instances
             WHERE module_type = $1 AND module_id = $2
               AND status IN ('running', 'returned_pending', 'escalation_needed')
            "#,
        )
        .bind(record.module_type.as_str())
        .bind(to_i64(record.module_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|r| r.try_get::<String, _>("id").map_err(backend))
            .transpose()
    }

    async fn write_changes(
        tx: &mut Transaction<'_, Postgres>,
        changes: &ChangeSet,
    ) -> StorageResult<()> {
        if let Some(write) = &changes.instance {
            let instance = write.value();
            let document = to_json(instance)?;
            match write {
                Versioned::Insert(_) => {
                    sqlx::query(
                        r#"
                        INSERT INTO approval_instances
                            (id, module_type, module_id, status, version, created_at, updated_at, document)
                        VALUES ($1, $2, $3, $4, 1, $5, $6, $7)
                        "#,
                    )
                    .bind(instance.id.0.clone())
                    .bind(instance.module_type.as_str())
                    .bind(to_i64(instance.module_id)?)
                    .bind(instance.status.as_str())
                    .bind(instance.created_at)
                    .bind(instance.updated_at)
                    .bind(document)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_conflict)?;
                }
                Versioned::Update {
                    expected_version, ..
                } => {
                    let result = sqlx::query(
                        r#"
                        UPDATE approval_instances
                           SET status = $1, version = version + 1, updated_at = $2, document = $3
                         WHERE id = $4 AND version = $5
                           AND status NOT IN ('approved', 'rejected')
                        "#,
                    )
                    .bind(instance.status.as_str())
                    .bind(instance.updated_at)
                    .bind(document)
                    .bind(instance.id.0.clone())
                    .bind(to_i64(*expected_version)?)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_conflict)?;
                    if result.rows_affected() == 0 {
                        return Err(StorageError::Conflict(format!(
                            "approval instance {} changed concurrently",
                            instance.id
                        )));
                    }
                }
            }
        }

        for write in &changes.executions {
            let execution = write.value();
            let document = to_json(execution)?;
            match write {
                Versioned::Insert(_) => {
                    sqlx::query(
                        r#"
                        INSERT INTO approval_step_executions
                            (id, instance_id, open, version, started_at, document)
                        VALUES ($1, $2, $3, 1, $4, $5)
                        "#,
                    )
                    .bind(execution.id.0.clone())
                    .bind(execution.instance_id.0.clone())
                    .bind(execution.open)
                    .bind(execution.started_at)
                    .bind(document)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_conflict)?;
                }
                Versioned::Update {
                    expected_version, ..
                } => {
                    let result = sqlx::query(
                        r#"
                        UPDATE approval_step_executions
                           SET open = $1, version = version + 1, document = $2
                         WHERE id = $3 AND version = $4 AND open
                        "#,
                    )
                    .bind(execution.open)
                    .bind(document)
                    .bind(execution.id.0.clone())
                    .bind(to_i64(*expected_version)?)
                    .execute(&mut **tx)
                    .await
                    .map_err(backend)?;
                    if result.rows_affected() == 0 {
                        return Err(StorageError::Conflict(format!(
                            "step execution {} changed concurrently",
                            execution.id
                        )));
                    }
                }
            }
        }

        for write in &changes.todos {
            let todo = write.value();
            let document = to_json(todo)?;
            match write {
                Versioned::Insert(_) => {
                    sqlx::query(
                        r#"
                        INSERT INTO approval_todos
                            (id, owner_id, instance_id, task_token, status, version, created_at, document)
                        VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
                        "#,
                    )
                    .bind(todo.id.0.clone())
                    .bind(todo.owner_id.0.clone())
                    .bind(todo.approval.as_ref().map(|l| l.instance_id.0.clone()))
                    .bind(todo.task_token().map(|t| t.0.clone()))
                    .bind(todo.status.as_str())
                    .bind(todo.created_at)
                    .bind(document)
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_conflict)?;
                }
                Versioned::Update {
                    expected_version, ..
                } => {
                    let result = sqlx::query(
                        r#"
                        UPDATE approval_todos
                           SET status = $1, version = version + 1, document = $2
                         WHERE id = $3 AND version = $4
                           AND status IN ('pending', 'in_progress')
                        "#,
                    )
                    .bind(todo.status.as_str())
                    .bind(document)
                    .bind(todo.id.0.clone())
                    .bind(to_i64(*expected_version)?)
                    .execute(&mut **tx)
                    .await
                    .map_err(backend)?;
                    if result.rows_affected() == 0 {
                        return Err(StorageError::Conflict(format!(
                            "todo {} changed concurrently",
                            todo.id
                        )));
                    }
                }
            }
        }

        for append in &changes.history {
            append_history(tx, append).await?;
        }

        if let Some(outcome) = &changes.outcome {
            sqlx::query(
                r#"
                INSERT INTO approval_pending_outcomes (instance_id, resolved_at, document)
                VALUES ($1, $2, $3)
                ON CONFLICT (instance_id) DO NOTHING
                "#,
            )
            .bind(outcome.instance_id.0.clone())
            .bind(outcome.resolved_at)
            .bind(to_json(outcome)?)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
        }

        Ok(())
    }
}

async fn append_history(
    tx: &mut Transaction<'_, Postgres>,
    append: &HistoryAppend,
) -> StorageResult<()> {
    let row = sqlx::query(
        "SELECT COALESCE(MAX(sequence) + 1, 0) AS next FROM approval_history WHERE instance_id = $1",
    )
    .bind(append.instance_id.0.clone())
    .fetch_one(&mut **tx)
    .await
    .map_err(backend)?;
    let sequence: i64 = row.try_get("next").map_err(backend)?;
    let entry = HistoryEntry::from_append(sequence as u64, append.clone());

    sqlx::query("INSERT INTO approval_history (instance_id, sequence, document) VALUES ($1, $2, $3)")
        .bind(entry.instance_id.0.clone())
        .bind(sequence)
        .bind(to_json(&entry)?)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_conflict)?;
    Ok(())
}

#[async_trait]
impl DefinitionStore for PostgresApprovalStore {
    async fn insert_definition(
        &self,
        mut definition: WorkflowDefinition,
    ) -> StorageResult<WorkflowDefinition> {
        definition.version = 1;
        let row = sqlx::query(
            r#"
            INSERT INTO approval_definitions (module_type, version, document)
            VALUES ($1, 1, $2)
            RETURNING id
            "#,
        )
        .bind(definition.module_type.as_str())
        .bind(to_json(&definition)?)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        let id: i64 = row.try_get("id").map_err(backend)?;
        definition.id = WorkflowDefinitionId::new(id as u64);
        Ok(definition)
    }

    async fn update_definition(
        &self,
        mut definition: WorkflowDefinition,
        expected_version: u32,
    ) -> StorageResult<WorkflowDefinition> {
        let existing = self
            .get_definition(definition.id)
            .await?
            .ok_or_else(|| {
                StorageError::NotFound(format!("workflow definition {} not found", definition.id))
            })?;
        definition.created_at = existing.created_at;
        definition.version = expected_version + 1;

        let result = sqlx::query(
            r#"
            UPDATE approval_definitions
               SET module_type = $1, version = version + 1, document = $2
             WHERE id = $3 AND version = $4
            "#,
        )
        .bind(definition.module_type.as_str())
        .bind(to_json(&definition)?)
        .bind(to_i64(definition.id.0)?)
        .bind(expected_version as i32)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "workflow definition {}: expected version {}, found {}",
                definition.id, expected_version, existing.version
            )));
        }
        Ok(definition)
    }

    async fn get_definition(
        &self,
        id: WorkflowDefinitionId,
    ) -> StorageResult<Option<WorkflowDefinition>> {
        let row = sqlx::query("SELECT id, version, document FROM approval_definitions WHERE id = $1")
            .bind(to_i64(id.0)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(definition_from_row).transpose()
    }

    async fn list_definitions(
        &self,
        module_type: Option<ModuleType>,
    ) -> StorageResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, document FROM approval_definitions
             WHERE $1::TEXT IS NULL OR module_type = $1
             ORDER BY id ASC
            "#,
        )
        .bind(module_type.map(|mt| mt.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(definition_from_row).collect()
    }
}

#[async_trait]
impl InstanceStore for PostgresApprovalStore {
    async fn get_instance(
        &self,
        id: &ApprovalInstanceId,
    ) -> StorageResult<Option<ApprovalInstance>> {
        let row = sqlx::query("SELECT version, document FROM approval_instances WHERE id = $1")
            .bind(id.0.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(instance_from_row).transpose()
    }

    async fn active_instance_for(
        &self,
        record: RecordRef,
    ) -> StorageResult<Option<ApprovalInstance>> {
        match self.active_instance_id(record).await? {
            Some(id) => self.get_instance(&ApprovalInstanceId::new(id)).await,
            None => Ok(None),
        }
    }

    async fn instances_for_record(
        &self,
        record: RecordRef,
    ) -> StorageResult<Vec<ApprovalInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM approval_instances
             WHERE module_type = $1 AND module_id = $2
             ORDER BY created_at DESC
            "#,
        )
        .bind(record.module_type.as_str())
        .bind(to_i64(record.module_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(instance_from_row).collect()
    }

    async fn escalated_instances(&self) -> StorageResult<Vec<ApprovalInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM approval_instances
             WHERE status = $1
             ORDER BY updated_at ASC
            "#,
        )
        .bind(InstanceStatus::EscalationNeeded.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(instance_from_row).collect()
    }

    async fn get_execution(&self, id: &StepExecutionId) -> StorageResult<Option<StepExecution>> {
        let row =
            sqlx::query("SELECT version, document FROM approval_step_executions WHERE id = $1")
                .bind(id.0.clone())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.map(execution_from_row).transpose()
    }

    async fn step_executions(
        &self,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<StepExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM approval_step_executions
             WHERE instance_id = $1
             ORDER BY started_at ASC
            "#,
        )
        .bind(instance_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(execution_from_row).collect()
    }

    async fn history(&self, instance_id: &ApprovalInstanceId) -> StorageResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT document FROM approval_history WHERE instance_id = $1 ORDER BY sequence ASC",
        )
        .bind(instance_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(|row| document(row)).collect()
    }

    async fn pending_outcomes(&self) -> StorageResult<Vec<PendingOutcome>> {
        let rows =
            sqlx::query("SELECT document FROM approval_pending_outcomes ORDER BY resolved_at ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
        rows.iter().map(|row| document(row)).collect()
    }

    async fn acknowledge_outcome(&self, instance_id: &ApprovalInstanceId) -> StorageResult<()> {
        sqlx::query("DELETE FROM approval_pending_outcomes WHERE instance_id = $1")
            .bind(instance_id.0.clone())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl TodoStore for PostgresApprovalStore {
    async fn get_todo(&self, id: &TodoId) -> StorageResult<Option<Todo>> {
        let row = sqlx::query("SELECT version, document FROM approval_todos WHERE id = $1")
            .bind(id.0.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(todo_from_row).transpose()
    }

    async fn todo_by_token(&self, token: &TaskToken) -> StorageResult<Option<Todo>> {
        let row = sqlx::query("SELECT version, document FROM approval_todos WHERE task_token = $1")
            .bind(token.0.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(todo_from_row).transpose()
    }

    async fn todos_for_owner(
        &self,
        owner: &UserId,
        statuses: &[TodoStatus],
    ) -> StorageResult<Vec<Todo>> {
        let statuses = statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect::<Vec<_>>();
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM approval_todos
             WHERE owner_id = $1
               AND (cardinality($2::TEXT[]) = 0 OR status = ANY($2))
             ORDER BY created_at ASC
            "#,
        )
        .bind(owner.0.clone())
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(todo_from_row).collect()
    }

    async fn todos_for_instance(
        &self,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<Todo>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM approval_todos
             WHERE instance_id = $1
             ORDER BY created_at ASC
            "#,
        )
        .bind(instance_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(todo_from_row).collect()
    }
}

#[async_trait]
impl ChangeStore for PostgresApprovalStore {
    async fn commit(&self, changes: ChangeSet) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        match Self::write_changes(&mut tx, &changes).await {
            Ok(()) => {
                tx.commit().await.map_err(backend)?;
                Ok(())
            }
            Err(StorageError::ActiveInstanceExists(_)) => {
                tx.rollback().await.map_err(backend)?;
                let record = changes
                    .instance
                    .as_ref()
                    .map(|w| w.value().record())
                    .ok_or_else(|| {
                        StorageError::InvariantViolation(
                            "active-record violation without an instance write".to_string(),
                        )
                    })?;
                match self.active_instance_id(record).await? {
                    Some(existing) => Err(StorageError::ActiveInstanceExists(
                        ApprovalInstanceId::new(existing),
                    )),
                    None => Err(StorageError::Conflict(format!(
                        "active instance for {record} changed concurrently"
                    ))),
                }
            }
            Err(err) => {
                tx.rollback().await.map_err(backend)?;
                Err(err)
            }
        }
    }
}

fn definition_from_row(row: PgRow) -> StorageResult<WorkflowDefinition> {
    let mut definition: WorkflowDefinition = document(&row)?;
    let id: i64 = row.try_get("id").map_err(backend)?;
    let version: i32 = row.try_get("version").map_err(backend)?;
    definition.id = WorkflowDefinitionId::new(id as u64);
    definition.version = version as u32;
    Ok(definition)
}

fn instance_from_row(row: PgRow) -> StorageResult<ApprovalInstance> {
    let mut instance: ApprovalInstance = document(&row)?;
    instance.version = version(&row)?;
    Ok(instance)
}

fn execution_from_row(row: PgRow) -> StorageResult<StepExecution> {
    let mut execution: StepExecution = document(&row)?;
    execution.version = version(&row)?;
    Ok(execution)
}

fn todo_from_row(row: PgRow) -> StorageResult<Todo> {
    let mut todo: Todo = document(&row)?;
    todo.version = version(&row)?;
    Ok(todo)
}

fn document<T: DeserializeOwned>(row: &PgRow) -> StorageResult<T> {
    let value: serde_json::Value = row.try_get("document").map_err(backend)?;
    serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn version(row: &PgRow) -> StorageResult<u64> {
    let version: i64 = row.try_get("version").map_err(backend)?;
    Ok(version as u64)
}

fn to_json<T: Serialize>(value: &T) -> StorageResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            if db_err.constraint() == Some(ACTIVE_RECORD_INDEX) {
                // The real id is looked up after rollback.
                return StorageError::ActiveInstanceExists(ApprovalInstanceId::new(""));
            }
            return StorageError::Conflict(db_err.message().to_string());
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i64(value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput(format!("value {value} too large")))
}
