use std::sync::Arc;

use signoff_core::approvals::{ApprovalEngine, EngineSettings};
use signoff_core::config::{AppConfig, ConfigError, LoadOptions};
use signoff_core::StaticReviewerDirectory;
use signoff_db::{
    connect_with_config, migrations, DbPool, SqlApprovalItemStore, SqlWorkflowStore,
    TransientRetry,
};
use thiserror::Error;
use tracing::info;

use crate::events::TracingEventSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: ApprovalEngine,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let engine = build_engine(&config, db_pool.clone());
    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        reviewer_item_types = config.reviewers.len(),
        max_decision_attempts = config.engine.max_decision_attempts,
        "approval engine wired over sql stores"
    );

    Ok(Application { config, db_pool, engine })
}

pub fn build_engine(config: &AppConfig, db_pool: DbPool) -> ApprovalEngine {
    let retry = TransientRetry::from(&config.persistence);
    let workflows = Arc::new(SqlWorkflowStore::with_retry(db_pool.clone(), retry));
    let items = Arc::new(SqlApprovalItemStore::with_retry(db_pool, retry));

    ApprovalEngine::new(
        workflows,
        items,
        Arc::new(StaticReviewerDirectory::new(config.reviewers.clone())),
        Arc::new(TracingEventSink),
        EngineSettings::from(&config.engine),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use signoff_core::config::{ConfigOverrides, LoadOptions};
    use signoff_core::domain::decision::DecisionKind;
    use signoff_core::domain::item::{ItemStatus, SubmissionRequest};
    use signoff_core::domain::workflow::{ApprovalStep, ApproverId, WorkflowDraft};
    use signoff_core::DecisionCommand;

    use crate::bootstrap::bootstrap;

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                gateway_token: Some("gw-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_gateway_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                gateway_token: Some("   ".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("server.gateway_token"));
    }

    #[tokio::test]
    async fn integration_smoke_runs_a_decision_through_sql_stores() {
        let dir = tempfile::tempdir().expect("tempdir");
        let database_url = format!("sqlite://{}?mode=rwc", dir.path().join("signoff.db").display());
        let app = bootstrap(valid_overrides(&database_url))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('approval_workflows', 'approval_items', 'approval_decisions')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected approval tables to be available after bootstrap");
        assert_eq!(table_count, 3);

        app.engine
            .registry
            .create_workflow(WorkflowDraft {
                name: "Press release".to_string(),
                workflow_type: "press_release".to_string(),
                client_id: None,
                steps: vec![ApprovalStep {
                    step_number: 1,
                    name: "Comms".to_string(),
                    approvers: vec![ApproverId("comms-lead".to_string())],
                    required_approvals: 1,
                }],
                auto_approve_threshold: None,
                require_all_approvers: false,
            })
            .await
            .expect("create workflow");

        let item = app
            .engine
            .submissions
            .submit(
                SubmissionRequest {
                    client_id: None,
                    item_type: "press_release".to_string(),
                    item_id: None,
                    title: "Q3 launch announcement".to_string(),
                    description: None,
                    priority: None,
                    due_date: None,
                    data: json!({ "headline": "We shipped" }),
                    workflow_id: None,
                },
                ApproverId("writer".to_string()),
            )
            .await
            .expect("submit");

        let decided = app
            .engine
            .decisions
            .decide(DecisionCommand {
                item_id: item.id.clone(),
                approver_id: ApproverId("comms-lead".to_string()),
                decision: DecisionKind::Approved,
                comments: Some("ship it".to_string()),
            })
            .await
            .expect("decide");
        assert_eq!(decided.status, ItemStatus::Approved);

        let detail = app.engine.submissions.get_detail(&item.id).await.expect("detail");
        assert_eq!(detail.decisions.len(), 1);
        assert_eq!(detail.decisions[0].comments.as_deref(), Some("ship it"));
    }
}
