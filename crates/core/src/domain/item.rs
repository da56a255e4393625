use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::workflow::{ApproverId, ClientId, WorkflowId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalItemId(pub String);

impl std::fmt::Display for ApprovalItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 6] = [
        Self::Pending,
        Self::InReview,
        Self::Approved,
        Self::Rejected,
        Self::Cancelled,
        Self::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled | Self::Expired)
    }

    pub fn is_awaiting_action(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared in ascending urgency so the derived `Ord` ranks `Urgent` highest.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalItem {
    pub id: ApprovalItemId,
    pub workflow_id: Option<WorkflowId>,
    pub client_id: Option<ClientId>,
    pub item_type: String,
    pub item_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub data: Value,
    pub status: ItemStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub submitted_by: ApproverId,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decision_version: u32,
}

impl ApprovalItem {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_awaiting_action() && self.due_date.is_some_and(|due| due < now)
    }
}

/// Reads the top-level `value` field of an opaque payload. Numbers and numeric strings are
/// accepted; anything else means the payload declares no value.
pub fn declared_value(data: &Value) -> Option<Decimal> {
    match data.get("value")? {
        Value::Number(number) => Decimal::from_str(&number.to_string())
            .or_else(|_| Decimal::from_scientific(&number.to_string()))
            .ok(),
        Value::String(raw) => Decimal::from_str(raw.trim()).ok(),
        _ => None,
    }
}

/// Dashboard ordering: priority descending, then oldest submission first.
pub fn dashboard_order(left: &ApprovalItem, right: &ApprovalItem) -> Ordering {
    right
        .priority
        .cmp(&left.priority)
        .then_with(|| left.submitted_at.cmp(&right.submitted_at))
        .then_with(|| left.id.0.cmp(&right.id.0))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    #[serde(default)]
    pub client_id: Option<ClientId>,
    pub item_type: String,
    #[serde(default)]
    pub item_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub workflow_id: Option<WorkflowId>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{
        dashboard_order, declared_value, ApprovalItem, ApprovalItemId, ItemStatus, Priority,
    };
    use crate::domain::workflow::ApproverId;

    fn item(id: &str, priority: Priority, minutes_ago: i64) -> ApprovalItem {
        let submitted_at = Utc::now() - Duration::minutes(minutes_ago);
        ApprovalItem {
            id: ApprovalItemId(id.to_string()),
            workflow_id: None,
            client_id: None,
            item_type: "content".to_string(),
            item_id: None,
            title: id.to_string(),
            description: None,
            data: json!({}),
            status: ItemStatus::Pending,
            current_step: 1,
            total_steps: 1,
            priority,
            due_date: None,
            submitted_by: ApproverId("author".to_string()),
            submitted_at,
            updated_at: submitted_at,
            decision_version: 0,
        }
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in ItemStatus::ALL {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        assert!(ItemStatus::parse("archived").is_none());
    }

    #[test]
    fn terminal_statuses_are_exactly_the_final_four() {
        let terminal: Vec<_> = ItemStatus::ALL.into_iter().filter(ItemStatus::is_terminal).collect();
        assert_eq!(
            terminal,
            vec![ItemStatus::Approved, ItemStatus::Rejected, ItemStatus::Cancelled, ItemStatus::Expired]
        );
    }

    #[test]
    fn dashboard_order_puts_oldest_urgent_first() {
        let mut items = vec![
            item("medium-old", Priority::Medium, 90),
            item("urgent-new", Priority::Urgent, 5),
            item("low-oldest", Priority::Low, 500),
            item("urgent-old", Priority::Urgent, 60),
        ];
        items.sort_by(dashboard_order);

        let ids: Vec<_> = items.iter().map(|item| item.id.0.as_str()).collect();
        assert_eq!(ids, vec!["urgent-old", "urgent-new", "medium-old", "low-oldest"]);
    }

    #[test]
    fn declared_value_accepts_numbers_and_numeric_strings() {
        assert_eq!(declared_value(&json!({ "value": 999 })), Some(Decimal::new(999, 0)));
        assert_eq!(declared_value(&json!({ "value": 12.5 })), Some(Decimal::new(125, 1)));
        assert_eq!(declared_value(&json!({ "value": " 1000 " })), Some(Decimal::new(1000, 0)));
        assert_eq!(declared_value(&json!({ "value": "n/a" })), None);
        assert_eq!(declared_value(&json!({ "amount": 10 })), None);
        assert_eq!(declared_value(&json!(null)), None);
    }

    #[test]
    fn overdue_requires_awaiting_status_and_past_due_date() {
        let now = Utc::now();
        let mut pending = item("a", Priority::High, 10);
        pending.due_date = Some(now - Duration::minutes(1));
        assert!(pending.is_overdue(now));

        pending.status = ItemStatus::Approved;
        assert!(!pending.is_overdue(now));

        let mut future = item("b", Priority::High, 10);
        future.due_date = Some(now + Duration::hours(1));
        assert!(!future.is_overdue(now));
    }
}
