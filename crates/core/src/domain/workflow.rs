use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApproverId(pub String);

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for ApproverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Id carried by the synthetic workflow returned when no configured workflow applies.
pub const DIRECT_APPROVAL_WORKFLOW_ID: &str = "direct-approval";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step_number: u32,
    pub name: String,
    pub approvers: Vec<ApproverId>,
    pub required_approvals: u32,
}

impl ApprovalStep {
    /// Number of distinct approvals needed to satisfy this step.
    pub fn quorum(&self, require_all_approvers: bool) -> usize {
        if require_all_approvers {
            self.approvers.len()
        } else {
            self.required_approvals as usize
        }
    }

    pub fn includes(&self, approver: &ApproverId) -> bool {
        self.approvers.iter().any(|candidate| candidate == approver)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub name: String,
    pub workflow_type: String,
    pub client_id: Option<ClientId>,
    pub version: u32,
    pub steps: Vec<ApprovalStep>,
    pub auto_approve_threshold: Option<Decimal>,
    pub require_all_approvers: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn step(&self, step_number: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.step_number == step_number)
    }

    pub fn is_direct_approval(&self) -> bool {
        self.id.0 == DIRECT_APPROVAL_WORKFLOW_ID
    }

    /// Strict less-than: a value equal to the threshold still goes through approval.
    pub fn auto_approves(&self, value: Option<Decimal>) -> bool {
        match (self.auto_approve_threshold, value) {
            (Some(threshold), Some(value)) => value < threshold,
            _ => false,
        }
    }

    pub fn direct_approval(
        workflow_type: &str,
        client_id: Option<ClientId>,
        reviewers: Vec<ApproverId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkflowId(DIRECT_APPROVAL_WORKFLOW_ID.to_string()),
            name: "Direct approval".to_string(),
            workflow_type: workflow_type.to_string(),
            client_id,
            version: 1,
            steps: vec![ApprovalStep {
                step_number: 1,
                name: "Review".to_string(),
                approvers: reviewers,
                required_approvals: 1,
            }],
            auto_approve_threshold: None,
            require_all_approvers: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Caller-supplied definition, validated before it becomes an [`ApprovalWorkflow`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDraft {
    pub name: String,
    pub workflow_type: String,
    #[serde(default)]
    pub client_id: Option<ClientId>,
    pub steps: Vec<ApprovalStep>,
    #[serde(default)]
    pub auto_approve_threshold: Option<Decimal>,
    #[serde(default)]
    pub require_all_approvers: bool,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowValidationError {
    #[error("workflow name must not be blank")]
    BlankName,
    #[error("workflow type must not be blank")]
    BlankWorkflowType,
    #[error("workflow must declare at least one step")]
    NoSteps,
    #[error("step numbers must run 1..=n without gaps; expected {expected}, found {found}")]
    NonContiguousSteps { expected: u32, found: u32 },
    #[error("step {step_number} must list at least one approver")]
    NoApprovers { step_number: u32 },
    #[error("step {step_number} must have a name")]
    BlankStepName { step_number: u32 },
    #[error("step {step_number} requires {required} approvals but lists {available} approvers")]
    QuorumExceedsApprovers { step_number: u32, required: u32, available: u32 },
    #[error("step {step_number} must require at least one approval")]
    ZeroQuorum { step_number: u32 },
    #[error("auto_approve_threshold must not be negative")]
    NegativeThreshold,
}

impl WorkflowDraft {
    /// Sorts steps, trims names and drops duplicate approvers before validating.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.workflow_type = self.workflow_type.trim().to_string();
        self.steps.sort_by_key(|step| step.step_number);
        for step in &mut self.steps {
            step.name = step.name.trim().to_string();
            let mut seen = BTreeSet::new();
            step.approvers = step
                .approvers
                .drain(..)
                .map(|approver| ApproverId(approver.0.trim().to_string()))
                .filter(|approver| !approver.0.is_empty() && seen.insert(approver.clone()))
                .collect();
        }
        self
    }

    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowValidationError::BlankName);
        }
        if self.workflow_type.trim().is_empty() {
            return Err(WorkflowValidationError::BlankWorkflowType);
        }
        if self.steps.is_empty() {
            return Err(WorkflowValidationError::NoSteps);
        }
        if self.auto_approve_threshold.is_some_and(|threshold| threshold.is_sign_negative()) {
            return Err(WorkflowValidationError::NegativeThreshold);
        }

        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.step_number != expected {
                return Err(WorkflowValidationError::NonContiguousSteps {
                    expected,
                    found: step.step_number,
                });
            }
            if step.name.trim().is_empty() {
                return Err(WorkflowValidationError::BlankStepName { step_number: expected });
            }
            if step.approvers.is_empty() {
                return Err(WorkflowValidationError::NoApprovers { step_number: expected });
            }
            if self.require_all_approvers {
                continue;
            }
            if step.required_approvals == 0 {
                return Err(WorkflowValidationError::ZeroQuorum { step_number: expected });
            }
            let available = step.approvers.len() as u32;
            if step.required_approvals > available {
                return Err(WorkflowValidationError::QuorumExceedsApprovers {
                    step_number: expected,
                    required: step.required_approvals,
                    available,
                });
            }
        }

        Ok(())
    }

    pub fn into_workflow(
        self,
        id: WorkflowId,
        version: u32,
        now: DateTime<Utc>,
    ) -> ApprovalWorkflow {
        let require_all_approvers = self.require_all_approvers;
        let steps = self
            .steps
            .into_iter()
            .map(|mut step| {
                if require_all_approvers {
                    step.required_approvals = step.approvers.len() as u32;
                }
                step
            })
            .collect();

        ApprovalWorkflow {
            id,
            name: self.name,
            workflow_type: self.workflow_type,
            client_id: self.client_id,
            version,
            steps,
            auto_approve_threshold: self.auto_approve_threshold,
            require_all_approvers,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
