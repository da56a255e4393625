use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::decision::ApprovalDecision;
use crate::domain::item::{dashboard_order, ApprovalItem, ApprovalItemId};
use crate::domain::workflow::{ApprovalWorkflow, ClientId, WorkflowId};

use super::store::{
    ApprovalItemStore, CommitOutcome, ItemQuery, ItemTransition, ListScope, StoreError,
    SupersedeOutcome, TallyQuery, TallyRow, WorkflowStore,
};

#[derive(Default)]
struct State {
    workflows: HashMap<String, ApprovalWorkflow>,
    items: HashMap<String, ApprovalItem>,
    decisions: Vec<ApprovalDecision>,
}

impl State {
    fn has_decision(&self, decision: &ApprovalDecision) -> bool {
        self.decisions.iter().any(|existing| {
            existing.approval_item_id == decision.approval_item_id
                && existing.step_number == decision.step_number
                && existing.approver_id == decision.approver_id
        })
    }
}

/// Single-lock store: every write holds the lock for the whole check-and-apply, which gives
/// the same compare-and-swap semantics the SQL transaction provides.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<State>,
}

fn duplicate(decision: &ApprovalDecision) -> StoreError {
    StoreError::DuplicateDecision {
        item_id: decision.approval_item_id.clone(),
        approver_id: decision.approver_id.clone(),
        step_number: decision.step_number,
    }
}

fn visible_to(client_id: Option<&ClientId>, candidate: Option<&ClientId>) -> bool {
    match (client_id, candidate) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(wanted), Some(actual)) => wanted == actual,
    }
}

#[async_trait]
impl WorkflowStore for InMemoryApprovalStore {
    async fn insert_workflow(&self, workflow: ApprovalWorkflow) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.workflows.contains_key(&workflow.id.0) {
            return Err(StoreError::Backend(format!("workflow `{}` already exists", workflow.id)));
        }
        state.workflows.insert(workflow.id.0.clone(), workflow);
        Ok(())
    }

    async fn find_workflow(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        let state = self.state.read().await;
        Ok(state.workflows.get(&id.0).cloned())
    }

    async fn list_workflows(
        &self,
        client_id: Option<&ClientId>,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        let state = self.state.read().await;
        let mut workflows: Vec<_> = state
            .workflows
            .values()
            .filter(|workflow| visible_to(client_id, workflow.client_id.as_ref()))
            .cloned()
            .collect();
        workflows.sort_by(|left, right| {
            left.name.cmp(&right.name).then_with(|| right.version.cmp(&left.version))
        });
        Ok(workflows)
    }

    async fn find_active(
        &self,
        client_id: Option<&ClientId>,
        workflow_type: &str,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .workflows
            .values()
            .filter(|workflow| workflow.is_active && workflow.workflow_type == workflow_type)
            .filter(|workflow| match (&workflow.client_id, client_id) {
                (None, _) => true,
                (Some(scoped), Some(wanted)) => scoped == wanted,
                (Some(_), None) => false,
            })
            .cloned()
            .collect())
    }

    async fn set_active(
        &self,
        id: &WorkflowId,
        is_active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state.workflows.get_mut(&id.0).map(|workflow| {
            workflow.is_active = is_active;
            workflow.updated_at = updated_at;
            workflow.clone()
        }))
    }

    async fn supersede(
        &self,
        previous: &WorkflowId,
        next: ApprovalWorkflow,
    ) -> Result<SupersedeOutcome, StoreError> {
        let mut state = self.state.write().await;
        if state.workflows.contains_key(&next.id.0) {
            return Err(StoreError::Backend(format!("workflow `{}` already exists", next.id)));
        }
        let Some(old) = state.workflows.get_mut(&previous.0) else {
            return Err(StoreError::Backend(format!("workflow `{previous}` does not exist")));
        };
        if !old.is_active {
            return Ok(SupersedeOutcome::PreviousInactive);
        }
        old.is_active = false;
        old.updated_at = next.created_at;
        state.workflows.insert(next.id.0.clone(), next);
        Ok(SupersedeOutcome::Applied)
    }
}

#[async_trait]
impl ApprovalItemStore for InMemoryApprovalStore {
    async fn insert_item(
        &self,
        item: ApprovalItem,
        decision: Option<ApprovalDecision>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.items.contains_key(&item.id.0) {
            return Err(StoreError::Backend(format!("item `{}` already exists", item.id)));
        }
        if let Some(decision) = decision {
            if state.has_decision(&decision) {
                return Err(duplicate(&decision));
            }
            state.decisions.push(decision);
        }
        state.items.insert(item.id.0.clone(), item);
        Ok(())
    }

    async fn find_item(&self, id: &ApprovalItemId) -> Result<Option<ApprovalItem>, StoreError> {
        let state = self.state.read().await;
        Ok(state.items.get(&id.0).cloned())
    }

    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<ApprovalItem>, StoreError> {
        let state = self.state.read().await;
        let mut items: Vec<_> = state
            .items
            .values()
            .filter(|item| match &query.client_id {
                Some(client_id) => item.client_id.as_ref() == Some(client_id),
                None => true,
            })
            .filter(|item| match query.scope {
                ListScope::Awaiting => item.status.is_awaiting_action(),
                ListScope::All => true,
            })
            .cloned()
            .collect();
        items.sort_by(dashboard_order);
        items.truncate(query.limit as usize);
        Ok(items)
    }

    async fn list_decisions(
        &self,
        id: &ApprovalItemId,
    ) -> Result<Vec<ApprovalDecision>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .decisions
            .iter()
            .filter(|decision| &decision.approval_item_id == id)
            .cloned()
            .collect())
    }

    async fn commit_transition(
        &self,
        transition: ItemTransition,
    ) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.write().await;
        let current_version = match state.items.get(&transition.item_id.0) {
            Some(item) => item.decision_version,
            None => {
                return Err(StoreError::Backend(format!(
                    "item `{}` does not exist",
                    transition.item_id
                )))
            }
        };
        if current_version != transition.expected_version {
            return Ok(CommitOutcome::VersionConflict);
        }
        if let Some(decision) = &transition.decision {
            if state.has_decision(decision) {
                return Err(duplicate(decision));
            }
        }

        if let Some(decision) = transition.decision {
            state.decisions.push(decision);
        }
        let Some(item) = state.items.get_mut(&transition.item_id.0) else {
            return Err(StoreError::Backend(format!("item `{}` vanished", transition.item_id)));
        };
        item.status = transition.status;
        item.current_step = transition.current_step;
        item.updated_at = transition.updated_at;
        item.decision_version += 1;
        Ok(CommitOutcome::Applied(item.clone()))
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalItem>, StoreError> {
        let state = self.state.read().await;
        let mut overdue: Vec<_> =
            state.items.values().filter(|item| item.is_overdue(now)).cloned().collect();
        overdue.sort_by(|left, right| {
            left.due_date.cmp(&right.due_date).then_with(|| left.id.0.cmp(&right.id.0))
        });
        overdue.truncate(limit as usize);
        Ok(overdue)
    }

    async fn tally(&self, query: &TallyQuery) -> Result<Vec<TallyRow>, StoreError> {
        let state = self.state.read().await;
        let mut grouped: HashMap<_, u64> = HashMap::new();
        for item in state.items.values() {
            if let Some(client_id) = &query.client_id {
                if item.client_id.as_ref() != Some(client_id) {
                    continue;
                }
            }
            let overdue = item.due_date.is_some_and(|due| due < query.now);
            let in_window = query.since.map_or(true, |since| item.updated_at >= since);
            *grouped.entry((item.status, item.priority, overdue, in_window)).or_default() += 1;
        }

        Ok(grouped
            .into_iter()
            .map(|((status, priority, overdue, in_window), count)| TallyRow {
                status,
                priority,
                overdue,
                in_window,
                count,
            })
            .collect())
    }
}
