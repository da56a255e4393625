use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use signoff_core::{ApprovalEvent, DrainReport, InMemoryEventSink, OverdueScanner};
use signoff_db::{SqlApprovalItemStore, TransientRetry};

use crate::commands::{migrated_pool, prepare, CommandResult};

#[derive(Serialize)]
struct SweepOutput {
    #[serde(flatten)]
    report: DrainReport,
    events: Vec<ApprovalEvent>,
}

/// One-shot overdue sweep over the whole backlog. The CLI has no event transport, so the
/// emitted events are returned in the command output.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("sweep") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let events = InMemoryEventSink::default();
    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let items = Arc::new(SqlApprovalItemStore::with_retry(
            pool.clone(),
            TransientRetry::from(&config.persistence),
        ));
        let scanner = OverdueScanner::new(
            items,
            Arc::new(events.clone()),
            config.engine.overdue_batch_size,
            config.engine.max_decision_attempts,
        );

        let report = scanner
            .sweep_all(Utc::now())
            .await
            .map_err(|error| ("sweep", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => {
            let mut message = format!(
                "examined {} overdue item(s) in {} batch(es): {} expired, {} skipped",
                report.totals.examined, report.batches, report.totals.expired, report.totals.skipped
            );
            if report.more_remaining {
                message.push_str("; overdue items remain, run the sweep again");
            }
            let output = SweepOutput { report, events: events.events() };
            CommandResult::success_with_data("sweep", message, serde_json::to_value(output).ok())
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
