use std::future::Future;
use std::time::Duration;

use signoff_core::config::PersistenceConfig;
use tracing::warn;

use crate::repositories::RepositoryError;

/// Exponential backoff for transient SQLite failures (pool timeouts, I/O, busy/locked).
///
/// Wraps whole units of work, so a retried transaction starts from scratch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransientRetry {
    attempts: u32,
    base_delay: Duration,
}

impl Default for TransientRetry {
    fn default() -> Self {
        Self::from(&PersistenceConfig::default())
    }
}

impl From<&PersistenceConfig> for TransientRetry {
    fn from(config: &PersistenceConfig) -> Self {
        Self::new(config.transient_retry_attempts, Duration::from_millis(config.transient_retry_base_delay_ms))
    }
}

impl TransientRetry {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self { attempts: attempts.max(1), base_delay }
    }

    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut unit: F) -> Result<T, RepositoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let mut attempt = 1;
        loop {
            match unit().await {
                Err(error) if attempt < self.attempts && error.is_transient() => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        event_name = "db.retry.transient_failure",
                        operation,
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient database failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16))
    }
}

pub(crate) fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended codes.
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(5 | 6))
                || db.message().contains("database is locked")
                || db.message().contains("database table is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::TransientRetry;
    use crate::repositories::RepositoryError;

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let retry = TransientRetry::new(3, Duration::from_millis(1));

        let value = retry
            .run("test.flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RepositoryError::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(7)
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let calls = AtomicU32::new(0);
        let retry = TransientRetry::new(2, Duration::from_millis(1));

        let error = retry
            .run("test.down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RepositoryError::Database(sqlx::Error::PoolTimedOut))
            })
            .await
            .expect_err("always fails");

        assert!(error.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let retry = TransientRetry::new(5, Duration::from_millis(1));

        let _ = retry
            .run("test.decode", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RepositoryError::Decode("bad row".to_string()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = TransientRetry::new(4, Duration::from_millis(50));
        assert_eq!(retry.delay_for(1), Duration::from_millis(50));
        assert_eq!(retry.delay_for(3), Duration::from_millis(200));
    }
}
