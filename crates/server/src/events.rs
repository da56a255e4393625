use signoff_core::{ApprovalEvent, ApprovalEventKind, EventSink};
use tracing::info;

/// Default sink for the server: every engine event becomes one structured log line that a
/// log shipper can route to notification delivery.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ApprovalEvent) {
        let (old_status, new_status) = match &event.kind {
            ApprovalEventKind::ItemStatusChanged { old, new, .. } => {
                (Some(old.as_str()), Some(new.as_str()))
            }
            _ => (None, None),
        };

        info!(
            event_name = "approvals.event.emitted",
            event_kind = event.kind.name(),
            event_id = %event.event_id,
            item_id = %event.item_id,
            client_id = event.client_id.as_ref().map(|client| client.0.as_str()).unwrap_or("global"),
            actor = %event.actor,
            old_status,
            new_status,
            payload = %payload(&event),
            "approval event emitted"
        );
    }
}

fn payload(event: &ApprovalEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Value;
    use signoff_core::{
        ApprovalEvent, ApprovalEventKind, ApprovalItemId, ApproverId, ClientId, EventSink,
        ItemStatus,
    };

    use super::{payload, TracingEventSink};

    fn status_change() -> ApprovalEvent {
        ApprovalEvent {
            event_id: "evt-1".to_string(),
            item_id: ApprovalItemId("item-1".to_string()),
            client_id: Some(ClientId("acme".to_string())),
            actor: ApproverId("finance-lead".to_string()),
            kind: ApprovalEventKind::ItemStatusChanged {
                old: ItemStatus::Pending,
                new: ItemStatus::Approved,
                from_step: 1,
                to_step: 1,
            },
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn payload_carries_event_tag_and_transition() {
        let value: Value = serde_json::from_str(&payload(&status_change())).expect("json");

        assert_eq!(value["event"], "item_status_changed");
        assert_eq!(value["old"], "pending");
        assert_eq!(value["new"], "approved");
        assert_eq!(value["client_id"], "acme");
    }

    #[test]
    fn emitting_without_subscriber_is_harmless() {
        TracingEventSink.emit(status_change());
    }
}
