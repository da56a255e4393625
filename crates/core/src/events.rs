//! Engine events handed to the notification layer.
//!
//! Sinks are fire-and-forget: they are invoked after a transition commits and can never undo it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::item::{ApprovalItem, ApprovalItemId, ItemStatus};
use crate::domain::workflow::{ApproverId, ClientId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEventKind {
    ItemSubmitted {
        item_type: String,
        status: ItemStatus,
        total_steps: u32,
    },
    ItemStatusChanged {
        old: ItemStatus,
        new: ItemStatus,
        from_step: u32,
        to_step: u32,
    },
    ItemExpired {
        due_date: Option<DateTime<Utc>>,
    },
}

impl ApprovalEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ItemSubmitted { .. } => "item_submitted",
            Self::ItemStatusChanged { .. } => "item_status_changed",
            Self::ItemExpired { .. } => "item_expired",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub event_id: String,
    pub item_id: ApprovalItemId,
    pub client_id: Option<ClientId>,
    pub actor: ApproverId,
    #[serde(flatten)]
    pub kind: ApprovalEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl ApprovalEvent {
    pub fn new(item: &ApprovalItem, actor: ApproverId, kind: ApprovalEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            item_id: item.id.clone(),
            client_id: item.client_id.clone(),
            actor,
            kind,
            occurred_at: Utc::now(),
        }
    }

    pub fn submitted(item: &ApprovalItem) -> Self {
        Self::new(
            item,
            item.submitted_by.clone(),
            ApprovalEventKind::ItemSubmitted {
                item_type: item.item_type.clone(),
                status: item.status,
                total_steps: item.total_steps,
            },
        )
    }

    /// `None` when neither status nor step moved.
    pub fn status_changed(
        before: &ApprovalItem,
        after: &ApprovalItem,
        actor: &ApproverId,
    ) -> Option<Self> {
        if before.status == after.status && before.current_step == after.current_step {
            return None;
        }
        Some(Self::new(
            after,
            actor.clone(),
            ApprovalEventKind::ItemStatusChanged {
                old: before.status,
                new: after.status,
                from_step: before.current_step,
                to_step: after.current_step,
            },
        ))
    }

    pub fn expired(item: &ApprovalItem, actor: &ApproverId) -> Self {
        Self::new(item, actor.clone(), ApprovalEventKind::ItemExpired { due_date: item.due_date })
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ApprovalEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: ApprovalEvent) {}
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<ApprovalEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<ApprovalEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.kind.name()).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: ApprovalEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
