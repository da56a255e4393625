use std::sync::Arc;

use chrono::{DateTime, Utc};
use signoff_core::{ClientId, StatsAggregator};
use signoff_db::{SqlApprovalItemStore, TransientRetry};

use crate::commands::{migrated_pool, prepare, CommandResult};

pub fn run(client_id: Option<&str>, since: Option<&str>) -> CommandResult {
    let since = match since.map(parse_since).transpose() {
        Ok(since) => since,
        Err(message) => return CommandResult::failure("stats", "invalid_argument", message, 2),
    };
    let client_id = client_id
        .map(str::trim)
        .filter(|client| !client.is_empty())
        .map(|client| ClientId(client.to_string()));

    let (config, runtime) = match prepare("stats") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let aggregator = StatsAggregator::new(Arc::new(SqlApprovalItemStore::with_retry(
            pool.clone(),
            TransientRetry::from(&config.persistence),
        )));

        let stats = aggregator
            .stats(client_id.as_ref(), since, Utc::now())
            .await
            .map_err(|error| ("stats", error.to_string(), 6u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(stats)
    });

    let scope = client_id.as_ref().map(|client| client.0.as_str()).unwrap_or("all clients");
    match result {
        Ok(stats) => CommandResult::success_with_data(
            "stats",
            format!(
                "{scope}: {} pending, {} in review, {} overdue",
                stats.pending, stats.in_review, stats.overdue
            ),
            serde_json::to_value(stats).ok(),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("stats", error_class, message, exit_code)
        }
    }
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| format!("--since must be an RFC 3339 timestamp: {error}"))
}
