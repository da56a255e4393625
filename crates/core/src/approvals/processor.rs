use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::decision::{ApprovalDecision, DecisionKind};
use crate::domain::item::{ApprovalItem, ApprovalItemId};
use crate::domain::workflow::ApproverId;
use crate::errors::ApprovalError;
use crate::events::{ApprovalEvent, EventSink};

use super::directory::ReviewerDirectory;
use super::quorum::{self, QuorumOutcome, StepContext};
use super::store::{ApprovalItemStore, CommitOutcome, ItemTransition, WorkflowStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCommand {
    pub item_id: ApprovalItemId,
    pub approver_id: ApproverId,
    pub decision: DecisionKind,
    pub comments: Option<String>,
}

/// The approval state machine.
///
/// Every call re-reads the item and its decisions, evaluates quorum from that snapshot and
/// commits the decision plus the derived state with a version check. A lost race re-runs the
/// whole evaluation against the fresh snapshot.
#[derive(Clone)]
pub struct DecisionProcessor {
    workflows: Arc<dyn WorkflowStore>,
    items: Arc<dyn ApprovalItemStore>,
    reviewers: Arc<dyn ReviewerDirectory>,
    events: Arc<dyn EventSink>,
    max_attempts: u32,
}

impl DecisionProcessor {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        items: Arc<dyn ApprovalItemStore>,
        reviewers: Arc<dyn ReviewerDirectory>,
        events: Arc<dyn EventSink>,
        max_attempts: u32,
    ) -> Self {
        Self { workflows, items, reviewers, events, max_attempts: max_attempts.max(1) }
    }

    pub async fn decide(&self, command: DecisionCommand) -> Result<ApprovalItem, ApprovalError> {
        // The step the approver is voting on, fixed by the first read. A retry that finds the
        // item on a later step must not silently re-target the vote.
        let mut target_step = None;

        for attempt in 1..=self.max_attempts {
            let item = self
                .items
                .find_item(&command.item_id)
                .await?
                .ok_or_else(|| ApprovalError::NotFound {
                    entity: "approval item",
                    id: command.item_id.0.clone(),
                })?;

            if item.status.is_terminal() {
                return Err(ApprovalError::AlreadyFinalized {
                    item_id: item.id,
                    status: item.status,
                });
            }

            let step = *target_step.get_or_insert(item.current_step);
            if item.current_step != step {
                return Err(ApprovalError::ConcurrentModification { item_id: item.id, attempts: attempt });
            }

            let quorum = self.authorize(&item, &command.approver_id).await?;

            let recorded: Vec<ApprovalDecision> = self
                .items
                .list_decisions(&item.id)
                .await?
                .into_iter()
                .filter(|decision| decision.step_number == step)
                .collect();
            if recorded.iter().any(|decision| decision.approver_id == command.approver_id) {
                return Err(ApprovalError::DuplicateDecision {
                    item_id: item.id,
                    approver_id: command.approver_id,
                    step_number: step,
                });
            }

            let evaluation = quorum::evaluate(
                StepContext { current_step: step, total_steps: item.total_steps, quorum },
                &recorded,
                &command.approver_id,
                command.decision,
            );

            let now = Utc::now();
            let transition = ItemTransition {
                item_id: item.id.clone(),
                expected_version: item.decision_version,
                status: evaluation.status,
                current_step: evaluation.current_step,
                decision: Some(ApprovalDecision::new(
                    item.id.clone(),
                    step,
                    command.approver_id.clone(),
                    command.decision,
                    command.comments.clone(),
                    now,
                )),
                updated_at: now,
            };

            match self.items.commit_transition(transition).await? {
                CommitOutcome::Applied(updated) => {
                    self.announce(&item, &updated, &command, &evaluation.outcome);
                    return Ok(updated);
                }
                CommitOutcome::VersionConflict => {
                    debug!(
                        event_name = "approvals.decision.version_conflict",
                        item_id = %item.id,
                        approver_id = %command.approver_id,
                        expected_version = item.decision_version,
                        attempt,
                        "decision lost a version race; re-evaluating"
                    );
                }
            }
        }

        Err(ApprovalError::ConcurrentModification {
            item_id: command.item_id,
            attempts: self.max_attempts,
        })
    }

    /// Returns the quorum of the item's current step when `approver_id` may decide it.
    async fn authorize(
        &self,
        item: &ApprovalItem,
        approver_id: &ApproverId,
    ) -> Result<usize, ApprovalError> {
        let denied = || ApprovalError::NotAuthorized {
            item_id: item.id.clone(),
            approver_id: approver_id.clone(),
            step_number: item.current_step,
        };

        let Some(workflow_id) = &item.workflow_id else {
            return if self.reviewers.is_reviewer(&item.item_type, approver_id) {
                Ok(1)
            } else {
                Err(denied())
            };
        };

        let workflow = self.workflows.find_workflow(workflow_id).await?.ok_or_else(|| {
            ApprovalError::Persistence(format!(
                "item `{}` references missing workflow `{workflow_id}`",
                item.id
            ))
        })?;
        let step = workflow.step(item.current_step).ok_or_else(|| {
            ApprovalError::Persistence(format!(
                "workflow `{workflow_id}` has no step {} for item `{}`",
                item.current_step, item.id
            ))
        })?;

        if step.includes(approver_id) {
            Ok(step.quorum(workflow.require_all_approvers))
        } else {
            Err(denied())
        }
    }

    fn announce(
        &self,
        before: &ApprovalItem,
        after: &ApprovalItem,
        command: &DecisionCommand,
        outcome: &QuorumOutcome,
    ) {
        info!(
            event_name = "approvals.decision.recorded",
            item_id = %after.id,
            approver_id = %command.approver_id,
            decision = command.decision.as_str(),
            step_number = before.current_step,
            status = %after.status,
            current_step = after.current_step,
            decision_version = after.decision_version,
            outcome = ?outcome,
            "approval decision recorded"
        );
        if let Some(event) = ApprovalEvent::status_changed(before, after, &command.approver_id) {
            self.events.emit(event);
        }
    }
}
