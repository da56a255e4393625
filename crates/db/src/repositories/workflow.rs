use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use signoff_core::approvals::store::{StoreError, SupersedeOutcome, WorkflowStore};
use signoff_core::domain::workflow::{ApprovalStep, ApprovalWorkflow, ClientId, WorkflowId};

use super::{encode_timestamp, parse_timestamp, parse_u32, RepositoryError};
use crate::retry::TransientRetry;
use crate::DbPool;

const WORKFLOW_COLUMNS: &str = "id, name, workflow_type, client_id, version, steps_json,
    auto_approve_threshold, require_all_approvers, is_active, created_at, updated_at";

pub struct SqlWorkflowStore {
    pool: DbPool,
    retry: TransientRetry,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_retry(pool, TransientRetry::default())
    }

    pub fn with_retry(pool: DbPool, retry: TransientRetry) -> Self {
        Self { pool, retry }
    }

    async fn insert_row<'e, E>(executor: E, workflow: &ApprovalWorkflow) -> Result<(), RepositoryError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            "INSERT INTO approval_workflows (
                id, name, workflow_type, client_id, version, steps_json,
                auto_approve_threshold, require_all_approvers, is_active, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.name)
        .bind(&workflow.workflow_type)
        .bind(workflow.client_id.as_ref().map(|client| client.0.as_str()))
        .bind(i64::from(workflow.version))
        .bind(serde_json::to_string(&workflow.steps)?)
        .bind(workflow.auto_approve_threshold.map(|threshold| threshold.to_string()))
        .bind(workflow.require_all_approvers)
        .bind(workflow.is_active)
        .bind(encode_timestamp(workflow.created_at))
        .bind(encode_timestamp(workflow.updated_at))
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: &WorkflowId) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {WORKFLOW_COLUMNS} FROM approval_workflows WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(workflow_from_row).transpose()
    }

    async fn try_supersede(
        &self,
        previous: &WorkflowId,
        next: &ApprovalWorkflow,
    ) -> Result<SupersedeOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let deactivated = sqlx::query(
            "UPDATE approval_workflows SET is_active = 0, updated_at = ?
             WHERE id = ? AND is_active = 1",
        )
        .bind(encode_timestamp(next.created_at))
        .bind(&previous.0)
        .execute(&mut *tx)
        .await?;
        if deactivated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM approval_workflows WHERE id = ?")
                .bind(&previous.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            if exists {
                return Ok(SupersedeOutcome::PreviousInactive);
            }
            return Err(RepositoryError::MissingRow(format!("workflow `{previous}` does not exist")));
        }

        Self::insert_row(&mut *tx, next).await?;
        tx.commit().await?;
        Ok(SupersedeOutcome::Applied)
    }
}

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn insert_workflow(&self, workflow: ApprovalWorkflow) -> Result<(), StoreError> {
        self.retry
            .run("workflow.insert", || Self::insert_row(&self.pool, &workflow))
            .await
            .map_err(StoreError::from)
    }

    async fn find_workflow(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        Ok(self.retry.run("workflow.find", || self.fetch(id)).await?)
    }

    async fn list_workflows(
        &self,
        client_id: Option<&ClientId>,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        let client = client_id.map(|client| client.0.clone());
        let rows = self
            .retry
            .run("workflow.list", || async {
                Ok(sqlx::query(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM approval_workflows
                     WHERE ?1 IS NULL OR client_id IS NULL OR client_id = ?1
                     ORDER BY name ASC, version DESC, id ASC"
                ))
                .bind(client.as_deref())
                .fetch_all(&self.pool)
                .await?)
            })
            .await?;

        Ok(rows.into_iter().map(workflow_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_active(
        &self,
        client_id: Option<&ClientId>,
        workflow_type: &str,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        let client = client_id.map(|client| client.0.clone());
        let rows = self
            .retry
            .run("workflow.find_active", || async {
                Ok(sqlx::query(&format!(
                    "SELECT {WORKFLOW_COLUMNS} FROM approval_workflows
                     WHERE is_active = 1
                       AND workflow_type = ?1
                       AND (client_id IS NULL OR client_id = ?2)"
                ))
                .bind(workflow_type)
                .bind(client.as_deref())
                .fetch_all(&self.pool)
                .await?)
            })
            .await?;

        Ok(rows.into_iter().map(workflow_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn set_active(
        &self,
        id: &WorkflowId,
        is_active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        let updated = self
            .retry
            .run("workflow.set_active", || async {
                let result = sqlx::query(
                    "UPDATE approval_workflows SET is_active = ?, updated_at = ? WHERE id = ?",
                )
                .bind(is_active)
                .bind(encode_timestamp(updated_at))
                .bind(&id.0)
                .execute(&self.pool)
                .await?;
                Ok(result.rows_affected())
            })
            .await?;

        if updated == 0 {
            return Ok(None);
        }
        self.find_workflow(id).await
    }

    async fn supersede(
        &self,
        previous: &WorkflowId,
        next: ApprovalWorkflow,
    ) -> Result<SupersedeOutcome, StoreError> {
        Ok(self.retry.run("workflow.supersede", || self.try_supersede(previous, &next)).await?)
    }
}

fn workflow_from_row(row: SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
    let steps_json: String = row.try_get("steps_json")?;
    let steps: Vec<ApprovalStep> = serde_json::from_str(&steps_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid steps_json: {error}")))?;

    let auto_approve_threshold = row
        .try_get::<Option<String>, _>("auto_approve_threshold")?
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid auto_approve_threshold `{raw}`: {error}"))
            })
        })
        .transpose()?;

    Ok(ApprovalWorkflow {
        id: WorkflowId(row.try_get("id")?),
        name: row.try_get("name")?,
        workflow_type: row.try_get("workflow_type")?,
        client_id: row.try_get::<Option<String>, _>("client_id")?.map(ClientId),
        version: parse_u32("version", row.try_get("version")?)?,
        steps,
        auto_approve_threshold,
        require_all_approvers: row.try_get("require_all_approvers")?,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
