use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use signoff_core::approvals::store::{
    ApprovalItemStore, CommitOutcome, ItemQuery, ItemTransition, ListScope, StoreError,
    TallyQuery, TallyRow,
};
use signoff_core::domain::decision::{ApprovalDecision, DecisionId, DecisionKind};
use signoff_core::domain::item::{ApprovalItem, ApprovalItemId, ItemStatus, Priority};
use signoff_core::domain::workflow::{ApproverId, ClientId, WorkflowId};

use super::{encode_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError};
use crate::retry::TransientRetry;
use crate::DbPool;

const ITEM_COLUMNS: &str = "id, workflow_id, client_id, item_type, item_id, title, description,
    data_json, status, current_step, total_steps, priority, due_date, submitted_by,
    submitted_at, updated_at, decision_version";

const PRIORITY_RANK: &str = "CASE priority
    WHEN 'urgent' THEN 3 WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END";

pub struct SqlApprovalItemStore {
    pool: DbPool,
    retry: TransientRetry,
}

impl SqlApprovalItemStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_retry(pool, TransientRetry::default())
    }

    pub fn with_retry(pool: DbPool, retry: TransientRetry) -> Self {
        Self { pool, retry }
    }

    async fn try_insert(
        &self,
        item: &ApprovalItem,
        decision: Option<&ApprovalDecision>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_items (
                id, workflow_id, client_id, item_type, item_id, title, description, data_json,
                status, current_step, total_steps, priority, due_date, submitted_by,
                submitted_at, updated_at, decision_version
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id.0)
        .bind(item.workflow_id.as_ref().map(|id| id.0.as_str()))
        .bind(item.client_id.as_ref().map(|id| id.0.as_str()))
        .bind(&item.item_type)
        .bind(item.item_id.as_deref())
        .bind(&item.title)
        .bind(item.description.as_deref())
        .bind(serde_json::to_string(&item.data)?)
        .bind(item.status.as_str())
        .bind(i64::from(item.current_step))
        .bind(i64::from(item.total_steps))
        .bind(item.priority.as_str())
        .bind(item.due_date.map(encode_timestamp))
        .bind(&item.submitted_by.0)
        .bind(encode_timestamp(item.submitted_at))
        .bind(encode_timestamp(item.updated_at))
        .bind(i64::from(item.decision_version))
        .execute(&mut *tx)
        .await?;

        if let Some(decision) = decision {
            insert_decision(&mut tx, decision).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Compare-and-swap on `decision_version`; the decision row rides in the same transaction.
    async fn try_commit(&self, transition: &ItemTransition) -> Result<CommitOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_items
             SET status = ?, current_step = ?, updated_at = ?, decision_version = decision_version + 1
             WHERE id = ? AND decision_version = ?",
        )
        .bind(transition.status.as_str())
        .bind(i64::from(transition.current_step))
        .bind(encode_timestamp(transition.updated_at))
        .bind(&transition.item_id.0)
        .bind(i64::from(transition.expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM approval_items WHERE id = ?")
                .bind(&transition.item_id.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            if !exists {
                return Err(RepositoryError::MissingRow(format!(
                    "item `{}` does not exist",
                    transition.item_id
                )));
            }
            return Ok(CommitOutcome::VersionConflict);
        }

        if let Some(decision) = &transition.decision {
            insert_decision(&mut tx, decision).await?;
        }

        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM approval_items WHERE id = ?"))
            .bind(&transition.item_id.0)
            .fetch_one(&mut *tx)
            .await?;
        let item = item_from_row(row)?;

        tx.commit().await?;
        Ok(CommitOutcome::Applied(item))
    }
}

async fn insert_decision(
    tx: &mut Transaction<'_, Sqlite>,
    decision: &ApprovalDecision,
) -> Result<(), RepositoryError> {
    let inserted = sqlx::query(
        "INSERT INTO approval_decisions (
            id, approval_item_id, step_number, approver_id, decision, comments, decided_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&decision.id.0)
    .bind(&decision.approval_item_id.0)
    .bind(i64::from(decision.step_number))
    .bind(&decision.approver_id.0)
    .bind(decision.decision.as_str())
    .bind(decision.comments.as_deref())
    .bind(encode_timestamp(decision.decided_at))
    .execute(&mut **tx)
    .await;

    match inserted {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
            Err(RepositoryError::DuplicateDecision {
                item_id: decision.approval_item_id.clone(),
                approver_id: decision.approver_id.clone(),
                step_number: decision.step_number,
            })
        }
        Err(error) => Err(error.into()),
    }
}

#[async_trait]
impl ApprovalItemStore for SqlApprovalItemStore {
    async fn insert_item(
        &self,
        item: ApprovalItem,
        decision: Option<ApprovalDecision>,
    ) -> Result<(), StoreError> {
        Ok(self.retry.run("item.insert", || self.try_insert(&item, decision.as_ref())).await?)
    }

    async fn find_item(&self, id: &ApprovalItemId) -> Result<Option<ApprovalItem>, StoreError> {
        let row = self
            .retry
            .run("item.find", || async {
                Ok(sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM approval_items WHERE id = ?"))
                    .bind(&id.0)
                    .fetch_optional(&self.pool)
                    .await?)
            })
            .await?;

        Ok(row.map(item_from_row).transpose()?)
    }

    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<ApprovalItem>, StoreError> {
        let client = query.client_id.as_ref().map(|client| client.0.clone());
        let awaiting_only = matches!(query.scope, ListScope::Awaiting);
        let rows = self
            .retry
            .run("item.list", || async {
                Ok(sqlx::query(&format!(
                    "SELECT {ITEM_COLUMNS} FROM approval_items
                     WHERE (?1 IS NULL OR client_id = ?1)
                       AND (?2 = 0 OR status IN ('pending', 'in_review'))
                     ORDER BY {PRIORITY_RANK} DESC, submitted_at ASC, id ASC
                     LIMIT ?3"
                ))
                .bind(client.as_deref())
                .bind(awaiting_only)
                .bind(i64::from(query.limit))
                .fetch_all(&self.pool)
                .await?)
            })
            .await?;

        Ok(rows.into_iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_decisions(
        &self,
        id: &ApprovalItemId,
    ) -> Result<Vec<ApprovalDecision>, StoreError> {
        let rows = self
            .retry
            .run("decision.list", || async {
                Ok(sqlx::query(
                    "SELECT id, approval_item_id, step_number, approver_id, decision, comments,
                            decided_at
                     FROM approval_decisions
                     WHERE approval_item_id = ?
                     ORDER BY decided_at ASC, step_number ASC, id ASC",
                )
                .bind(&id.0)
                .fetch_all(&self.pool)
                .await?)
            })
            .await?;

        Ok(rows.into_iter().map(decision_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn commit_transition(
        &self,
        transition: ItemTransition,
    ) -> Result<CommitOutcome, StoreError> {
        Ok(self.retry.run("item.commit_transition", || self.try_commit(&transition)).await?)
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ApprovalItem>, StoreError> {
        let now = encode_timestamp(now);
        let rows = self
            .retry
            .run("item.list_overdue", || async {
                Ok(sqlx::query(&format!(
                    "SELECT {ITEM_COLUMNS} FROM approval_items
                     WHERE status IN ('pending', 'in_review')
                       AND due_date IS NOT NULL
                       AND due_date < ?
                     ORDER BY due_date ASC, id ASC
                     LIMIT ?"
                ))
                .bind(&now)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?)
            })
            .await?;

        Ok(rows.into_iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn tally(&self, query: &TallyQuery) -> Result<Vec<TallyRow>, StoreError> {
        let client = query.client_id.as_ref().map(|client| client.0.clone());
        let now = encode_timestamp(query.now);
        let since = query.since.map(encode_timestamp);
        let rows = self
            .retry
            .run("item.tally", || async {
                Ok(sqlx::query(
                    "SELECT status,
                            priority,
                            (due_date IS NOT NULL AND due_date < ?1) AS overdue,
                            (?2 IS NULL OR updated_at >= ?2) AS in_window,
                            COUNT(*) AS count
                     FROM approval_items
                     WHERE ?3 IS NULL OR client_id = ?3
                     GROUP BY status, priority, overdue, in_window",
                )
                .bind(&now)
                .bind(since.as_deref())
                .bind(client.as_deref())
                .fetch_all(&self.pool)
                .await?)
            })
            .await?;

        Ok(rows.into_iter().map(tally_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn item_from_row(row: SqliteRow) -> Result<ApprovalItem, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ItemStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown item status `{status_raw}`")))?;
    let priority_raw = row.try_get::<String, _>("priority")?;
    let priority = Priority::parse(&priority_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?;
    let data_json: String = row.try_get("data_json")?;

    Ok(ApprovalItem {
        id: ApprovalItemId(row.try_get("id")?),
        workflow_id: row.try_get::<Option<String>, _>("workflow_id")?.map(WorkflowId),
        client_id: row.try_get::<Option<String>, _>("client_id")?.map(ClientId),
        item_type: row.try_get("item_type")?,
        item_id: row.try_get("item_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        data: serde_json::from_str(&data_json)?,
        status,
        current_step: parse_u32("current_step", row.try_get("current_step")?)?,
        total_steps: parse_u32("total_steps", row.try_get("total_steps")?)?,
        priority,
        due_date: parse_optional_timestamp("due_date", row.try_get("due_date")?)?,
        submitted_by: ApproverId(row.try_get("submitted_by")?),
        submitted_at: parse_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        decision_version: parse_u32("decision_version", row.try_get("decision_version")?)?,
    })
}

fn decision_from_row(row: SqliteRow) -> Result<ApprovalDecision, RepositoryError> {
    let decision_raw = row.try_get::<String, _>("decision")?;
    let decision = DecisionKind::parse(&decision_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown decision `{decision_raw}`")))?;

    Ok(ApprovalDecision {
        id: DecisionId(row.try_get("id")?),
        approval_item_id: ApprovalItemId(row.try_get("approval_item_id")?),
        step_number: parse_u32("step_number", row.try_get("step_number")?)?,
        approver_id: ApproverId(row.try_get("approver_id")?),
        decision,
        comments: row.try_get("comments")?,
        decided_at: parse_timestamp("decided_at", row.try_get("decided_at")?)?,
    })
}

fn tally_from_row(row: SqliteRow) -> Result<TallyRow, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let priority_raw = row.try_get::<String, _>("priority")?;
    let count: i64 = row.try_get("count")?;

    Ok(TallyRow {
        status: ItemStatus::parse(&status_raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown item status `{status_raw}`")))?,
        priority: Priority::parse(&priority_raw)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?,
        overdue: row.try_get::<i64, _>("overdue")? != 0,
        in_window: row.try_get::<i64, _>("in_window")? != 0,
        count: u64::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative count {count}")))?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use signoff_core::approvals::store::{
        ApprovalItemStore, CommitOutcome, ItemQuery, ItemTransition, ListScope, StoreError,
        TallyQuery,
    };
    use signoff_core::domain::decision::{ApprovalDecision, DecisionKind};
    use signoff_core::domain::item::{ApprovalItem, ApprovalItemId, ItemStatus, Priority};
    use signoff_core::domain::workflow::{ApproverId, ClientId};

    use super::SqlApprovalItemStore;
    use crate::repositories::test_support::setup_pool;

    fn sample_item(id: &str, priority: Priority, minutes_ago: i64) -> ApprovalItem {
        let base = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).single().expect("valid");
        let submitted_at = base - Duration::minutes(minutes_ago);
        ApprovalItem {
            id: ApprovalItemId(id.to_string()),
            workflow_id: None,
            client_id: Some(ClientId("acme".to_string())),
            item_type: "invoice".to_string(),
            item_id: Some(format!("INV-{id}")),
            title: format!("Invoice {id}"),
            description: None,
            data: json!({ "value": "1200.00", "lines": 3 }),
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

    fn vote(item: &ApprovalItem, approver: &str) -> ApprovalDecision {
        ApprovalDecision::new(
            item.id.clone(),
            1,
            ApproverId(approver.to_string()),
            DecisionKind::Approved,
            Some("looks right".to_string()),
            item.submitted_at + Duration::minutes(5),
        )
    }

    fn approve_transition(item: &ApprovalItem, approver: &str, expected_version: u32) -> ItemTransition {
        ItemTransition {
            item_id: item.id.clone(),
            expected_version,
            status: ItemStatus::Approved,
            current_step: 1,
            decision: Some(vote(item, approver)),
            updated_at: item.submitted_at + Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trips_item() {
        let store = SqlApprovalItemStore::new(setup_pool().await);
        let item = sample_item("a", Priority::High, 10);

        store.insert_item(item.clone(), None).await.expect("insert");
        let found = store.find_item(&item.id).await.expect("find");

        assert_eq!(found, Some(item));
    }

    #[tokio::test]
    async fn commit_is_version_checked_and_records_decision() {
        let store = SqlApprovalItemStore::new(setup_pool().await);
        let item = sample_item("a", Priority::Medium, 10);
        store.insert_item(item.clone(), None).await.expect("insert");

        let applied =
            store.commit_transition(approve_transition(&item, "fin-1", 0)).await.expect("commit");
        let CommitOutcome::Applied(updated) = applied else {
            panic!("first commit should apply");
        };
        assert_eq!(updated.status, ItemStatus::Approved);
        assert_eq!(updated.decision_version, 1);

        let stale =
            store.commit_transition(approve_transition(&item, "fin-2", 0)).await.expect("stale");
        assert_eq!(stale, CommitOutcome::VersionConflict);

        let decisions = store.list_decisions(&item.id).await.expect("decisions");
        assert_eq!(decisions.len(), 1, "the losing decision must not be written");
        assert_eq!(decisions[0].approver_id.0, "fin-1");
    }

    #[tokio::test]
    async fn duplicate_decision_rolls_back_the_item_update() {
        let store = SqlApprovalItemStore::new(setup_pool().await);
        let item = sample_item("a", Priority::Medium, 10);
        store.insert_item(item.clone(), None).await.expect("insert");

        let mut first = approve_transition(&item, "fin-1", 0);
        first.status = ItemStatus::InReview;
        store.commit_transition(first).await.expect("first vote");

        let error = store
            .commit_transition(approve_transition(&item, "fin-1", 1))
            .await
            .expect_err("same approver, same step");
        assert!(matches!(error, StoreError::DuplicateDecision { step_number: 1, .. }));

        let current = store.find_item(&item.id).await.expect("find").expect("exists");
        assert_eq!(current.status, ItemStatus::InReview);
        assert_eq!(current.decision_version, 1);
    }

    #[tokio::test]
    async fn listing_orders_by_priority_then_submission_age() {
        let store = SqlApprovalItemStore::new(setup_pool().await);
        store.insert_item(sample_item("low-old", Priority::Low, 90), None).await.expect("1");
        store.insert_item(sample_item("urgent-new", Priority::Urgent, 5), None).await.expect("2");
        store.insert_item(sample_item("urgent-old", Priority::Urgent, 60), None).await.expect("3");
        let mut done = sample_item("high-done", Priority::High, 30);
        done.status = ItemStatus::Approved;
        store.insert_item(done, None).await.expect("4");

        let query = ItemQuery {
            client_id: Some(ClientId("acme".to_string())),
            scope: ListScope::Awaiting,
            limit: 10,
        };
        let ids: Vec<_> =
            store.list_items(&query).await.expect("list").into_iter().map(|item| item.id.0).collect();
        assert_eq!(ids, vec!["urgent-old", "urgent-new", "low-old"]);

        let all = ItemQuery { scope: ListScope::All, limit: 2, ..query };
        let ids: Vec<_> =
            store.list_items(&all).await.expect("list").into_iter().map(|item| item.id.0).collect();
        assert_eq!(ids, vec!["urgent-old", "urgent-new"]);
    }

    #[tokio::test]
    async fn overdue_and_tally_use_due_date_and_window() {
        let store = SqlApprovalItemStore::new(setup_pool().await);
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).single().expect("valid");

        let mut late = sample_item("late", Priority::Urgent, 60);
        late.due_date = Some(now - Duration::hours(1));
        let mut future = sample_item("future", Priority::Low, 60);
        future.due_date = Some(now + Duration::hours(1));
        let mut closed = sample_item("closed", Priority::Urgent, 60);
        closed.status = ItemStatus::Rejected;
        closed.due_date = Some(now - Duration::hours(2));
        for item in [late, future, closed] {
            store.insert_item(item, None).await.expect("insert");
        }

        let overdue = store.list_overdue(now, 10).await.expect("overdue");
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id.0, "late");

        let rows = store
            .tally(&TallyQuery { client_id: None, since: Some(now), now })
            .await
            .expect("tally");
        let total: u64 = rows.iter().map(|row| row.count).sum();
        assert_eq!(total, 3);
        let rejected = rows.iter().find(|row| row.status == ItemStatus::Rejected).expect("row");
        assert!(!rejected.in_window, "updated before `since`");
        assert!(rows.iter().any(|row| row.status == ItemStatus::Pending && row.overdue));
    }

    #[tokio::test]
    async fn system_decision_is_written_with_auto_approved_item() {
        let store = SqlApprovalItemStore::new(setup_pool().await);
        let mut item = sample_item("auto", Priority::Medium, 1);
        item.status = ItemStatus::Approved;
        item.current_step = 0;
        item.total_steps = 0;
        let decision =
            ApprovalDecision::system_auto_approval(item.id.clone(), "below threshold", item.submitted_at);

        store.insert_item(item.clone(), Some(decision)).await.expect("insert");

        let trail = store.list_decisions(&item.id).await.expect("trail");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].step_number, 0);
        assert_eq!(trail[0].approver_id.0, "system");
    }

    #[tokio::test]
    async fn concurrent_commits_on_one_version_apply_once() {
        let pool = crate::connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        crate::migrations::run_pending(&pool).await.expect("migrate");
        let store = Arc::new(SqlApprovalItemStore::new(pool));
        let item = sample_item("race", Priority::Medium, 10);
        store.insert_item(item.clone(), None).await.expect("insert");

        let mut handles = Vec::new();
        for approver in ["p1", "p2", "p3", "p4"] {
            let store = store.clone();
            let transition = approve_transition(&item, approver, 0);
            handles.push(tokio::spawn(async move { store.commit_transition(transition).await }));
        }

        let mut applied = 0;
        for handle in handles {
            if let CommitOutcome::Applied(_) = handle.await.expect("join").expect("commit") {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(store.list_decisions(&item.id).await.expect("trail").len(), 1);
    }
}
