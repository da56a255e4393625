pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod retry;

pub use connection::{connect, connect_with_config, connect_with_settings, ping, DbPool};
pub use repositories::{RepositoryError, SqlApprovalItemStore, SqlWorkflowStore};
pub use retry::TransientRetry;
