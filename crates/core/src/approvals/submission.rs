use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::decision::ApprovalDecision;
use crate::domain::item::{
    declared_value, ApprovalItem, ApprovalItemId, ItemStatus, SubmissionRequest,
};
use crate::domain::workflow::{ApprovalWorkflow, ApproverId, ClientId};
use crate::errors::ApprovalError;
use crate::events::{ApprovalEvent, EventSink};

use super::registry::WorkflowRegistry;
use super::store::{ApprovalItemStore, CommitOutcome, ItemQuery, ItemTransition, ListScope};
use super::EngineSettings;

/// An item together with its full decision trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemDetail {
    pub item: ApprovalItem,
    pub decisions: Vec<ApprovalDecision>,
}

/// Submission, read paths and cancellation for approval items.
#[derive(Clone)]
pub struct SubmissionService {
    registry: WorkflowRegistry,
    items: Arc<dyn ApprovalItemStore>,
    events: Arc<dyn EventSink>,
    settings: EngineSettings,
}

impl SubmissionService {
    pub fn new(
        registry: WorkflowRegistry,
        items: Arc<dyn ApprovalItemStore>,
        events: Arc<dyn EventSink>,
        settings: EngineSettings,
    ) -> Self {
        Self { registry, items, events, settings }
    }

    pub async fn submit(
        &self,
        request: SubmissionRequest,
        submitted_by: ApproverId,
    ) -> Result<ApprovalItem, ApprovalError> {
        let item_type = request.item_type.trim().to_string();
        if item_type.is_empty() {
            return Err(ApprovalError::InvalidWorkflow("item_type must not be blank".to_string()));
        }

        let workflow = match &request.workflow_id {
            Some(workflow_id) => {
                let workflow = self.registry.get(workflow_id).await?;
                check_submittable(&workflow, &item_type, request.client_id.as_ref())?;
                workflow
            }
            None => self.registry.resolve(request.client_id.as_ref(), &item_type).await?,
        };

        let now = Utc::now();
        let id = ApprovalItemId(Uuid::new_v4().to_string());
        let auto_approved = workflow.auto_approves(declared_value(&request.data));
        let (status, current_step, total_steps) = if auto_approved {
            (ItemStatus::Approved, 0, 0)
        } else {
            (ItemStatus::Pending, 1, workflow.total_steps())
        };

        let item = ApprovalItem {
            id: id.clone(),
            workflow_id: (!workflow.is_direct_approval()).then(|| workflow.id.clone()),
            client_id: request.client_id,
            item_type,
            item_id: request.item_id,
            title: request.title.trim().to_string(),
            description: request.description,
            data: request.data,
            status,
            current_step,
            total_steps,
            priority: request.priority.unwrap_or_default(),
            due_date: request.due_date,
            submitted_by,
            submitted_at: now,
            updated_at: now,
            decision_version: 0,
        };

        let system_decision = auto_approved.then(|| {
            ApprovalDecision::system_auto_approval(
                id.clone(),
                format!(
                    "auto-approved: declared value below threshold of workflow `{}`",
                    workflow.id
                ),
                now,
            )
        });

        self.items.insert_item(item.clone(), system_decision).await?;

        info!(
            event_name = "approvals.item.submitted",
            item_id = %item.id,
            item_type = %item.item_type,
            workflow_id = %workflow.id,
            status = %item.status,
            total_steps = item.total_steps,
            auto_approved,
            "approval item submitted"
        );
        self.events.emit(ApprovalEvent::submitted(&item));

        Ok(item)
    }

    pub async fn get(&self, id: &ApprovalItemId) -> Result<ApprovalItem, ApprovalError> {
        self.items.find_item(id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn get_detail(&self, id: &ApprovalItemId) -> Result<ItemDetail, ApprovalError> {
        let item = self.get(id).await?;
        let decisions = self.items.list_decisions(id).await?;
        Ok(ItemDetail { item, decisions })
    }

    /// Items still awaiting action (`pending` or `in_review`), most urgent and oldest first.
    /// Without a `limit` the queue is returned up to `list_limit_max` items.
    pub async fn list_pending(
        &self,
        client_id: Option<&ClientId>,
        limit: Option<u32>,
    ) -> Result<Vec<ApprovalItem>, ApprovalError> {
        let limit = limit
            .unwrap_or(self.settings.list_limit_max)
            .clamp(1, self.settings.list_limit_max);
        let query = ItemQuery { client_id: client_id.cloned(), scope: ListScope::Awaiting, limit };
        Ok(self.items.list_items(&query).await?)
    }

    pub async fn list_all(
        &self,
        client_id: Option<&ClientId>,
        limit: Option<u32>,
    ) -> Result<Vec<ApprovalItem>, ApprovalError> {
        let limit = limit
            .unwrap_or(self.settings.list_limit_default)
            .clamp(1, self.settings.list_limit_max);
        let query = ItemQuery { client_id: client_id.cloned(), scope: ListScope::All, limit };
        Ok(self.items.list_items(&query).await?)
    }

    /// Terminal items fail with `InvalidTransition`; an item finalized by a concurrent writer
    /// between read and write fails with `AlreadyFinalized`.
    pub async fn cancel(
        &self,
        id: &ApprovalItemId,
        actor_id: &ApproverId,
    ) -> Result<ApprovalItem, ApprovalError> {
        let mut observed_awaiting = false;

        for attempt in 1..=self.settings.max_decision_attempts {
            let item = self.get(id).await?;
            if item.status.is_terminal() {
                if observed_awaiting {
                    return Err(ApprovalError::AlreadyFinalized {
                        item_id: item.id,
                        status: item.status,
                    });
                }
                return Err(ApprovalError::InvalidTransition {
                    item_id: item.id,
                    from: item.status,
                    to: ItemStatus::Cancelled,
                });
            }
            observed_awaiting = true;

            let transition = ItemTransition {
                item_id: item.id.clone(),
                expected_version: item.decision_version,
                status: ItemStatus::Cancelled,
                current_step: item.current_step,
                decision: None,
                updated_at: Utc::now(),
            };

            match self.items.commit_transition(transition).await? {
                CommitOutcome::Applied(updated) => {
                    info!(
                        event_name = "approvals.item.cancelled",
                        item_id = %updated.id,
                        actor_id = %actor_id,
                        previous_status = %item.status,
                        "approval item cancelled"
                    );
                    if let Some(event) = ApprovalEvent::status_changed(&item, &updated, actor_id) {
                        self.events.emit(event);
                    }
                    return Ok(updated);
                }
                CommitOutcome::VersionConflict => {
                    debug!(
                        event_name = "approvals.item.cancel_conflict",
                        item_id = %item.id,
                        attempt,
                        "version conflict while cancelling; retrying"
                    );
                }
            }
        }

        Err(ApprovalError::ConcurrentModification {
            item_id: id.clone(),
            attempts: self.settings.max_decision_attempts,
        })
    }
}

fn check_submittable(
    workflow: &ApprovalWorkflow,
    item_type: &str,
    client_id: Option<&ClientId>,
) -> Result<(), ApprovalError> {
    if !workflow.is_active {
        return Err(ApprovalError::InvalidWorkflow(format!(
            "workflow `{}` is inactive and accepts no new submissions",
            workflow.id
        )));
    }
    if workflow.workflow_type != item_type {
        return Err(ApprovalError::InvalidWorkflow(format!(
            "workflow `{}` handles `{}` items, not `{item_type}`",
            workflow.id, workflow.workflow_type
        )));
    }
    if let Some(scoped) = &workflow.client_id {
        if client_id != Some(scoped) {
            return Err(ApprovalError::InvalidWorkflow(format!(
                "workflow `{}` belongs to another client",
                workflow.id
            )));
        }
    }
    Ok(())
}

fn not_found(id: &ApprovalItemId) -> ApprovalError {
    ApprovalError::NotFound { entity: "approval item", id: id.0.clone() }
}
