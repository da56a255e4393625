use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use signoff_core::approvals::store::StoreError;
use signoff_core::domain::item::ApprovalItemId;
use signoff_core::domain::workflow::ApproverId;

pub mod item;
pub mod workflow;

pub use item::SqlApprovalItemStore;
pub use workflow::SqlWorkflowStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("decision already recorded for `{approver_id}` on step {step_number} of `{item_id}`")]
    DuplicateDecision { item_id: ApprovalItemId, approver_id: ApproverId, step_number: u32 },
    #[error("{0}")]
    MissingRow(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(error) if crate::retry::is_transient(error))
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::DuplicateDecision { item_id, approver_id, step_number } => {
                StoreError::DuplicateDecision { item_id, approver_id, step_number }
            }
            RepositoryError::Decode(message) => StoreError::Decode(message),
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
            RepositoryError::MissingRow(message) => StoreError::Backend(message),
        }
    }
}

/// Fixed-width UTC text so that SQL string comparison orders timestamps correctly.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{encode_timestamp, parse_timestamp};

    #[test]
    fn encoded_timestamps_sort_lexicographically() {
        let early = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).single().expect("valid");
        let late = early + chrono::Duration::milliseconds(1500);

        let (early_text, late_text) = (encode_timestamp(early), encode_timestamp(late));
        assert_eq!(early_text, "2026-03-09T08:00:00.000000Z");
        assert!(early_text < late_text);
        assert_eq!(parse_timestamp("t", late_text).expect("parse"), late);
    }
}
