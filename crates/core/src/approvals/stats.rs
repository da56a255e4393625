use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::item::{ItemStatus, Priority};
use crate::domain::workflow::ClientId;
use crate::errors::ApprovalError;

use super::store::{ApprovalItemStore, TallyQuery, TallyRow};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStats {
    pub pending: u64,
    pub in_review: u64,
    pub approved: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub expired: u64,
    pub urgent_pending: u64,
    pub overdue: u64,
}

impl ApprovalStats {
    pub fn from_rows(rows: &[TallyRow]) -> Self {
        let mut stats = Self::default();
        for row in rows {
            let awaiting = row.status.is_awaiting_action();
            if !awaiting && !row.in_window {
                continue;
            }

            match row.status {
                ItemStatus::Pending => stats.pending += row.count,
                ItemStatus::InReview => stats.in_review += row.count,
                ItemStatus::Approved => stats.approved += row.count,
                ItemStatus::Rejected => stats.rejected += row.count,
                ItemStatus::Cancelled => stats.cancelled += row.count,
                ItemStatus::Expired => stats.expired += row.count,
            }
            if awaiting && row.priority == Priority::Urgent {
                stats.urgent_pending += row.count;
            }
            if awaiting && row.overdue {
                stats.overdue += row.count;
            }
        }
        stats
    }
}

/// Dashboard counts recomputed from the store on every call.
#[derive(Clone)]
pub struct StatsAggregator {
    items: Arc<dyn ApprovalItemStore>,
}

impl StatsAggregator {
    pub fn new(items: Arc<dyn ApprovalItemStore>) -> Self {
        Self { items }
    }

    /// Awaiting counts are always current; terminal counts honour `since` when given.
    pub async fn stats(
        &self,
        client_id: Option<&ClientId>,
        since: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalStats, ApprovalError> {
        let rows =
            self.items.tally(&TallyQuery { client_id: client_id.cloned(), since, now }).await?;
        Ok(ApprovalStats::from_rows(&rows))
    }
}
