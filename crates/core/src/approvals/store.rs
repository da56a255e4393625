//! Persistence seam for the approval engine.
//!
//! The engine only talks to these traits. `signoff-db` implements them over SQLite and
//! [`super::memory::InMemoryApprovalStore`] implements them for tests and embedded use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::decision::ApprovalDecision;
use crate::domain::item::{ApprovalItem, ApprovalItemId, ItemStatus, Priority};
use crate::domain::workflow::{ApprovalWorkflow, ApproverId, ClientId, WorkflowId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("decision already recorded for `{approver_id}` on step {step_number} of `{item_id}`")]
    DuplicateDecision { item_id: ApprovalItemId, approver_id: ApproverId, step_number: u32 },
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Version-conditioned state change, optionally carrying the decision that caused it.
///
/// Applied only if the stored `decision_version` still equals `expected_version`; the decision
/// row and the item update commit together or not at all.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemTransition {
    pub item_id: ApprovalItemId,
    pub expected_version: u32,
    pub status: ItemStatus,
    pub current_step: u32,
    pub decision: Option<ApprovalDecision>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommitOutcome {
    Applied(ApprovalItem),
    VersionConflict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupersedeOutcome {
    Applied,
    /// The previous row was already retired by another edit or a deactivation.
    PreviousInactive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListScope {
    /// `pending` and `in_review` only.
    Awaiting,
    All,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemQuery {
    pub client_id: Option<ClientId>,
    pub scope: ListScope,
    pub limit: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TallyQuery {
    pub client_id: Option<ClientId>,
    /// Lower bound on `updated_at` applied to terminal statuses only.
    pub since: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

/// One grouped count row; the aggregator folds these into dashboard numbers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TallyRow {
    pub status: ItemStatus,
    pub priority: Priority,
    pub overdue: bool,
    pub in_window: bool,
    pub count: u64,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert_workflow(&self, workflow: ApprovalWorkflow) -> Result<(), StoreError>;

    async fn find_workflow(&self, id: &WorkflowId)
        -> Result<Option<ApprovalWorkflow>, StoreError>;

    /// `Some(client)` returns that client's workflows plus global ones; `None` returns all.
    async fn list_workflows(
        &self,
        client_id: Option<&ClientId>,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError>;

    /// Active workflows of `workflow_type` scoped to `client_id` or global.
    async fn find_active(
        &self,
        client_id: Option<&ClientId>,
        workflow_type: &str,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError>;

    async fn set_active(
        &self,
        id: &WorkflowId,
        is_active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<ApprovalWorkflow>, StoreError>;

    /// Deactivates `previous` and inserts `next` atomically, provided `previous` is still
    /// active. Otherwise nothing is written.
    async fn supersede(
        &self,
        previous: &WorkflowId,
        next: ApprovalWorkflow,
    ) -> Result<SupersedeOutcome, StoreError>;
}

#[async_trait]
pub trait ApprovalItemStore: Send + Sync {
    /// Inserts a new item, together with an initial decision when one is supplied.
    async fn insert_item(
        &self,
        item: ApprovalItem,
        decision: Option<ApprovalDecision>,
    ) -> Result<(), StoreError>;

    async fn find_item(&self, id: &ApprovalItemId) -> Result<Option<ApprovalItem>, StoreError>;

    /// Ordered by priority descending, then `submitted_at` ascending.
    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<ApprovalItem>, StoreError>;

    /// Ordered by `decided_at` ascending.
    async fn list_decisions(
        &self,
        id: &ApprovalItemId,
    ) -> Result<Vec<ApprovalDecision>, StoreError>;

    async fn commit_transition(
        &self,
        transition: ItemTransition,
    ) -> Result<CommitOutcome, StoreError>;

    /// Awaiting items whose due date is before `now`, oldest due date first.
    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalItem>, StoreError>;

    async fn tally(&self, query: &TallyQuery) -> Result<Vec<TallyRow>, StoreError>;
}
