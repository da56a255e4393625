use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::item::{ApprovalItem, ItemStatus};
use crate::domain::workflow::ApproverId;
use crate::errors::ApprovalError;
use crate::events::{ApprovalEvent, EventSink};

use super::store::{ApprovalItemStore, CommitOutcome, ItemTransition};

/// Actor recorded on events produced by the sweep.
pub const OVERDUE_SCANNER_ACTOR: &str = "overdue-scanner";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub examined: u32,
    pub expired: u32,
    pub skipped: u32,
}

/// Totals for a sweep that keeps taking batches until the backlog is gone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    #[serde(flatten)]
    pub totals: SweepReport,
    pub batches: u32,
    /// A full batch made no progress, so overdue items are still waiting.
    pub more_remaining: bool,
}

/// Expires awaiting items whose due date has passed, through the same version-checked write
/// the decision path uses. Whichever of a decision and the sweep commits first wins.
#[derive(Clone)]
pub struct OverdueScanner {
    items: Arc<dyn ApprovalItemStore>,
    events: Arc<dyn EventSink>,
    batch_size: u32,
    max_attempts: u32,
}

impl OverdueScanner {
    pub fn new(
        items: Arc<dyn ApprovalItemStore>,
        events: Arc<dyn EventSink>,
        batch_size: u32,
        max_attempts: u32,
    ) -> Self {
        Self { items, events, batch_size: batch_size.max(1), max_attempts: max_attempts.max(1) }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ApprovalError> {
        let candidates = self.items.list_overdue(now, self.batch_size).await?;
        let mut report = SweepReport::default();

        for candidate in candidates {
            report.examined += 1;
            if self.expire(candidate, now).await? {
                report.expired += 1;
            } else {
                report.skipped += 1;
            }
        }

        if report.examined > 0 {
            info!(
                event_name = "approvals.overdue.sweep_completed",
                examined = report.examined,
                expired = report.expired,
                skipped = report.skipped,
                "overdue sweep completed"
            );
        }
        Ok(report)
    }

    /// Runs batches until one comes back short. Stops early, flagging `more_remaining`, when a
    /// full batch expired nothing, since every item in it kept losing to concurrent writers.
    pub async fn sweep_all(&self, now: DateTime<Utc>) -> Result<DrainReport, ApprovalError> {
        let mut drained = DrainReport::default();
        loop {
            let batch = self.sweep(now).await?;
            drained.batches += 1;
            drained.totals.examined += batch.examined;
            drained.totals.expired += batch.expired;
            drained.totals.skipped += batch.skipped;

            if batch.examined < self.batch_size {
                return Ok(drained);
            }
            if batch.expired == 0 {
                warn!(
                    event_name = "approvals.overdue.backlog_stalled",
                    batches = drained.batches,
                    examined = drained.totals.examined,
                    "full overdue batch made no progress; leaving the rest for the next run"
                );
                drained.more_remaining = true;
                return Ok(drained);
            }
        }
    }

    /// Returns `false` when the item stopped being overdue or the retries ran out.
    async fn expire(
        &self,
        mut item: ApprovalItem,
        now: DateTime<Utc>,
    ) -> Result<bool, ApprovalError> {
        let actor = ApproverId(OVERDUE_SCANNER_ACTOR.to_string());

        for attempt in 1..=self.max_attempts {
            if !item.is_overdue(now) {
                return Ok(false);
            }

            let transition = ItemTransition {
                item_id: item.id.clone(),
                expected_version: item.decision_version,
                status: ItemStatus::Expired,
                current_step: item.current_step,
                decision: None,
                updated_at: now,
            };

            match self.items.commit_transition(transition).await? {
                CommitOutcome::Applied(updated) => {
                    info!(
                        event_name = "approvals.item.expired",
                        item_id = %updated.id,
                        previous_status = %item.status,
                        "approval item expired"
                    );
                    self.events.emit(ApprovalEvent::expired(&updated, &actor));
                    if let Some(event) = ApprovalEvent::status_changed(&item, &updated, &actor) {
                        self.events.emit(event);
                    }
                    return Ok(true);
                }
                CommitOutcome::VersionConflict => {
                    debug!(
                        event_name = "approvals.overdue.version_conflict",
                        item_id = %item.id,
                        attempt,
                        "item changed during sweep; re-reading"
                    );
                    match self.items.find_item(&item.id).await? {
                        Some(fresh) => item = fresh,
                        None => return Ok(false),
                    }
                }
            }
        }

        warn!(
            event_name = "approvals.overdue.gave_up",
            item_id = %item.id,
            attempts = self.max_attempts,
            "item kept changing during sweep; leaving it for the next run"
        );
        Ok(false)
    }
}
