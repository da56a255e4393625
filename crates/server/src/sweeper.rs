use std::time::Duration;

use chrono::Utc;
use signoff_core::OverdueScanner;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Runs the overdue sweep on a fixed interval until `shutdown` flips to `true`.
///
/// A slow sweep delays the next tick instead of queueing a burst of catch-up sweeps.
pub fn spawn(
    scanner: OverdueScanner,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            event_name = "approvals.sweeper.started",
            correlation_id = "sweeper",
            interval_secs = every.as_secs(),
            "overdue sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match scanner.sweep(Utc::now()).await {
                        Ok(report) if report.examined > 0 => info!(
                            event_name = "approvals.sweeper.tick",
                            correlation_id = "sweeper",
                            examined = report.examined,
                            expired = report.expired,
                            skipped = report.skipped,
                            "overdue sweep finished"
                        ),
                        Ok(_) => {}
                        Err(sweep_error) => error!(
                            event_name = "approvals.sweeper.failed",
                            correlation_id = "sweeper",
                            error_code = sweep_error.code(),
                            error = %sweep_error,
                            "overdue sweep failed; retrying on next tick"
                        ),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            event_name = "approvals.sweeper.stopped",
            correlation_id = "sweeper",
            "overdue sweeper stopped"
        );
    })
}
