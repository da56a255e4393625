use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::workflow::{ApprovalWorkflow, ClientId, WorkflowDraft, WorkflowId};
use crate::errors::ApprovalError;

use super::directory::ReviewerDirectory;
use super::store::{SupersedeOutcome, WorkflowStore};

/// Creates, versions and resolves workflow definitions.
#[derive(Clone)]
pub struct WorkflowRegistry {
    store: Arc<dyn WorkflowStore>,
    reviewers: Arc<dyn ReviewerDirectory>,
}

impl WorkflowRegistry {
    pub fn new(store: Arc<dyn WorkflowStore>, reviewers: Arc<dyn ReviewerDirectory>) -> Self {
        Self { store, reviewers }
    }

    pub async fn create_workflow(
        &self,
        draft: WorkflowDraft,
    ) -> Result<ApprovalWorkflow, ApprovalError> {
        let draft = draft.normalized();
        draft.validate()?;

        let workflow =
            draft.into_workflow(WorkflowId(Uuid::new_v4().to_string()), 1, Utc::now());
        self.store.insert_workflow(workflow.clone()).await?;

        info!(
            event_name = "approvals.workflow.created",
            workflow_id = %workflow.id,
            workflow_type = %workflow.workflow_type,
            steps = workflow.total_steps(),
            "approval workflow created"
        );
        Ok(workflow)
    }

    /// Publishes a new version and retires the previous one. Items already submitted keep
    /// pointing at the retired row, so their steps never change underneath them.
    pub async fn update_workflow(
        &self,
        id: &WorkflowId,
        draft: WorkflowDraft,
    ) -> Result<ApprovalWorkflow, ApprovalError> {
        let previous = self.get(id).await?;
        if !previous.is_active {
            return Err(ApprovalError::InvalidWorkflow(format!(
                "workflow `{id}` is inactive and cannot be edited"
            )));
        }

        let draft = draft.normalized();
        draft.validate()?;
        if draft.workflow_type != previous.workflow_type || draft.client_id != previous.client_id
        {
            return Err(ApprovalError::InvalidWorkflow(
                "workflow_type and client_id cannot change between versions".to_string(),
            ));
        }

        let next = draft.into_workflow(
            WorkflowId(Uuid::new_v4().to_string()),
            previous.version + 1,
            Utc::now(),
        );
        if self.store.supersede(&previous.id, next.clone()).await?
            == SupersedeOutcome::PreviousInactive
        {
            warn!(
                event_name = "approvals.workflow.version_conflict",
                workflow_id = %previous.id,
                "workflow retired by a concurrent edit; update discarded"
            );
            return Err(ApprovalError::InvalidWorkflow(format!(
                "workflow `{id}` was changed concurrently; reload the latest version and retry"
            )));
        }

        info!(
            event_name = "approvals.workflow.versioned",
            workflow_id = %next.id,
            previous_workflow_id = %previous.id,
            version = next.version,
            "approval workflow superseded"
        );
        Ok(next)
    }

    pub async fn deactivate(&self, id: &WorkflowId) -> Result<ApprovalWorkflow, ApprovalError> {
        let workflow = self
            .store
            .set_active(id, false, Utc::now())
            .await?
            .ok_or_else(|| not_found(id))?;
        info!(
            event_name = "approvals.workflow.deactivated",
            workflow_id = %workflow.id,
            "approval workflow deactivated"
        );
        Ok(workflow)
    }

    pub async fn get(&self, id: &WorkflowId) -> Result<ApprovalWorkflow, ApprovalError> {
        self.store.find_workflow(id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn list(
        &self,
        client_id: Option<&ClientId>,
    ) -> Result<Vec<ApprovalWorkflow>, ApprovalError> {
        Ok(self.store.list_workflows(client_id).await?)
    }

    /// Most specific active workflow for the client and type: client-scoped beats global and
    /// the newest version wins. Falls back to a synthetic single-step direct approval.
    pub async fn resolve(
        &self,
        client_id: Option<&ClientId>,
        workflow_type: &str,
    ) -> Result<ApprovalWorkflow, ApprovalError> {
        let candidates = self.store.find_active(client_id, workflow_type).await?;
        let best = candidates.into_iter().max_by(|left, right| {
            left.client_id
                .is_some()
                .cmp(&right.client_id.is_some())
                .then_with(|| left.version.cmp(&right.version))
                .then_with(|| left.created_at.cmp(&right.created_at))
        });

        if let Some(workflow) = best {
            return Ok(workflow);
        }

        let reviewers = self.reviewers.reviewers_for(workflow_type);
        if reviewers.is_empty() {
            warn!(
                event_name = "approvals.workflow.no_reviewers",
                workflow_type = %workflow_type,
                "no workflow or reviewers configured; direct approval has no eligible approver"
            );
        }
        Ok(ApprovalWorkflow::direct_approval(
            workflow_type,
            client_id.cloned(),
            reviewers,
            Utc::now(),
        ))
    }
}

fn not_found(id: &WorkflowId) -> ApprovalError {
    ApprovalError::NotFound { entity: "workflow", id: id.0.clone() }
}
