use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use signoff_core::{
    ApprovalEngine, ApprovalError, ApprovalStep, ApproverId, DecisionCommand, DecisionKind,
    EngineSettings, InMemoryEventSink, ItemStatus, StaticReviewerDirectory, SubmissionRequest,
    WorkflowDraft,
};
use signoff_db::{
    connect_with_settings, migrations, DbPool, SqlApprovalItemStore, SqlWorkflowStore,
    TransientRetry,
};
use tempfile::TempDir;

struct Fixture {
    engine: ApprovalEngine,
    events: InMemoryEventSink,
    _dir: TempDir,
    pool: DbPool,
}

async fn fixture(max_connections: u32) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("engine.db").display());
    let pool = connect_with_settings(&url, max_connections, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");

    let retry = TransientRetry::default();
    let events = InMemoryEventSink::default();
    let engine = ApprovalEngine::new(
        Arc::new(SqlWorkflowStore::with_retry(pool.clone(), retry)),
        Arc::new(SqlApprovalItemStore::with_retry(pool.clone(), retry)),
        Arc::new(StaticReviewerDirectory::new(BTreeMap::new())),
        Arc::new(events.clone()),
        EngineSettings::default(),
    );
    Fixture { engine, events, _dir: dir, pool }
}

fn approver(id: &str) -> ApproverId {
    ApproverId(id.to_string())
}

fn step(step_number: u32, approvers: &[&str], required_approvals: u32) -> ApprovalStep {
    ApprovalStep {
        step_number,
        name: format!("Step {step_number}"),
        approvers: approvers.iter().map(|id| approver(id)).collect(),
        required_approvals,
    }
}

fn budget_change(due_in: Option<Duration>) -> SubmissionRequest {
    SubmissionRequest {
        client_id: None,
        item_type: "budget_change".to_string(),
        item_id: Some("campaign-42".to_string()),
        title: "Raise Q4 paid social budget".to_string(),
        description: None,
        priority: None,
        due_date: due_in.map(|offset| Utc::now() + offset),
        data: json!({ "delta": 1500 }),
        workflow_id: None,
    }
}

fn decide(item: &signoff_core::ApprovalItem, who: &str, decision: DecisionKind) -> DecisionCommand {
    DecisionCommand {
        item_id: item.id.clone(),
        approver_id: approver(who),
        decision,
        comments: None,
    }
}

async fn two_step_workflow(engine: &ApprovalEngine) {
    engine
        .registry
        .create_workflow(WorkflowDraft {
            name: "Budget sign-off".to_string(),
            workflow_type: "budget_change".to_string(),
            client_id: None,
            steps: vec![step(1, &["a", "b", "c"], 2), step(2, &["cfo"], 1)],
            auto_approve_threshold: None,
            require_all_approvers: false,
        })
        .await
        .expect("create workflow");
}

#[tokio::test]
async fn two_step_workflow_progresses_through_sql_stores() {
    let fixture = fixture(4).await;
    let engine = &fixture.engine;
    two_step_workflow(engine).await;

    let item = engine.submissions.submit(budget_change(None), approver("planner")).await.expect("submit");
    assert_eq!((item.status, item.current_step, item.total_steps), (ItemStatus::Pending, 1, 2));

    let item = engine.decisions.decide(decide(&item, "a", DecisionKind::Approved)).await.expect("a");
    assert_eq!((item.status, item.current_step), (ItemStatus::InReview, 1));

    let item = engine.decisions.decide(decide(&item, "b", DecisionKind::Approved)).await.expect("b");
    assert_eq!((item.status, item.current_step), (ItemStatus::Pending, 2));

    let item = engine.decisions.decide(decide(&item, "cfo", DecisionKind::Approved)).await.expect("cfo");
    assert_eq!(item.status, ItemStatus::Approved);
    assert_eq!(item.decision_version, 3);

    let detail = engine.submissions.get_detail(&item.id).await.expect("detail");
    let trail: Vec<(u32, &str)> = detail
        .decisions
        .iter()
        .map(|decision| (decision.step_number, decision.approver_id.0.as_str()))
        .collect();
    assert_eq!(trail, vec![(1, "a"), (1, "b"), (2, "cfo")]);

    let error = engine
        .decisions
        .decide(decide(&item, "c", DecisionKind::Approved))
        .await
        .expect_err("finalized");
    assert!(matches!(error, ApprovalError::AlreadyFinalized { .. }));

    fixture.pool.close().await;
}

#[tokio::test]
async fn overdue_sweep_expires_item_and_blocks_later_decisions() {
    let fixture = fixture(2).await;
    let engine = &fixture.engine;
    two_step_workflow(engine).await;

    let item = engine
        .submissions
        .submit(budget_change(Some(Duration::minutes(-5))), approver("planner"))
        .await
        .expect("submit");

    let report = engine.overdue.sweep(Utc::now()).await.expect("sweep");
    assert_eq!((report.examined, report.expired, report.skipped), (1, 1, 0));
    assert!(fixture.events.names().contains(&"item_expired"));

    let error = engine
        .decisions
        .decide(decide(&item, "a", DecisionKind::Approved))
        .await
        .expect_err("expired");
    assert!(matches!(error, ApprovalError::AlreadyFinalized { status: ItemStatus::Expired, .. }));

    let stats = engine.stats.stats(None, None, Utc::now()).await.expect("stats");
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.overdue, 0);

    fixture.pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_quorum_completions_advance_the_item_once() {
    let fixture = fixture(4).await;
    let engine = fixture.engine.clone();
    engine
        .registry
        .create_workflow(WorkflowDraft {
            name: "Any one editor".to_string(),
            workflow_type: "budget_change".to_string(),
            client_id: None,
            steps: vec![step(1, &["a", "b", "c"], 1), step(2, &["cfo"], 1)],
            auto_approve_threshold: None,
            require_all_approvers: false,
        })
        .await
        .expect("create workflow");
    let item = engine.submissions.submit(budget_change(None), approver("planner")).await.expect("submit");

    let mut tasks = tokio::task::JoinSet::new();
    for who in ["a", "b", "c"] {
        let engine = engine.clone();
        let command = decide(&item, who, DecisionKind::Approved);
        tasks.spawn(async move { engine.decisions.decide(command).await });
    }

    let mut applied = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task") {
            Ok(updated) => {
                applied += 1;
                assert_eq!(updated.current_step, 2);
            }
            Err(ApprovalError::ConcurrentModification { .. })
            | Err(ApprovalError::NotAuthorized { step_number: 2, .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(applied, 1);

    let detail = engine.submissions.get_detail(&item.id).await.expect("detail");
    assert_eq!((detail.item.status, detail.item.current_step), (ItemStatus::Pending, 2));
    assert_eq!(detail.item.decision_version, 1);
    assert_eq!(detail.decisions.iter().filter(|decision| decision.step_number == 1).count(), 1);

    fixture.pool.close().await;
}
