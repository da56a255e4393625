use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::item::ApprovalItemId;
use crate::domain::workflow::ApproverId;

/// Approver recorded on the implicit decision written for auto-approved items.
pub const SYSTEM_APPROVER: &str = "system";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approved,
    Rejected,
    RequestChanges,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::RequestChanges => "request_changes",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            "request_changes" => Some(Self::RequestChanges),
            _ => None,
        }
    }
}

/// Append-only audit record. Never updated or deleted once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: DecisionId,
    pub approval_item_id: ApprovalItemId,
    pub step_number: u32,
    pub approver_id: ApproverId,
    pub decision: DecisionKind,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn new(
        approval_item_id: ApprovalItemId,
        step_number: u32,
        approver_id: ApproverId,
        decision: DecisionKind,
        comments: Option<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DecisionId(Uuid::new_v4().to_string()),
            approval_item_id,
            step_number,
            approver_id,
            decision,
            comments: comments.filter(|text| !text.trim().is_empty()),
            decided_at,
        }
    }

    pub fn system_auto_approval(
        approval_item_id: ApprovalItemId,
        comments: impl Into<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            approval_item_id,
            0,
            ApproverId(SYSTEM_APPROVER.to_string()),
            DecisionKind::Approved,
            Some(comments.into()),
            decided_at,
        )
    }
}
