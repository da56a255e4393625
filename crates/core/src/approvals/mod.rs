//! Approval workflow engine.
//!
//! - [`registry`]: workflow definitions, versioning and resolution
//! - [`submission`]: submit, read paths and cancel
//! - [`processor`]: the decision state machine
//! - [`overdue`]: due-date expiry sweep
//! - [`stats`]: dashboard projection
//!
//! Components share nothing but the stores behind [`store`], so any number of engine
//! instances can run against the same database.

pub mod directory;
pub mod memory;
pub mod overdue;
pub mod processor;
pub mod quorum;
pub mod registry;
pub mod stats;
pub mod store;
pub mod submission;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::events::EventSink;

use self::directory::ReviewerDirectory;
use self::overdue::OverdueScanner;
use self::processor::DecisionProcessor;
use self::registry::WorkflowRegistry;
use self::stats::StatsAggregator;
use self::store::{ApprovalItemStore, WorkflowStore};
use self::submission::SubmissionService;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub max_decision_attempts: u32,
    pub overdue_batch_size: u32,
    pub list_limit_default: u32,
    pub list_limit_max: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_decision_attempts: 3,
            overdue_batch_size: 500,
            list_limit_default: 100,
            list_limit_max: 500,
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_decision_attempts: config.max_decision_attempts,
            overdue_batch_size: config.overdue_batch_size,
            list_limit_default: config.list_limit_default,
            list_limit_max: config.list_limit_max,
        }
    }
}

/// All engine components wired over one pair of stores.
#[derive(Clone)]
pub struct ApprovalEngine {
    pub registry: WorkflowRegistry,
    pub submissions: SubmissionService,
    pub decisions: DecisionProcessor,
    pub overdue: OverdueScanner,
    pub stats: StatsAggregator,
}

impl ApprovalEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        items: Arc<dyn ApprovalItemStore>,
        reviewers: Arc<dyn ReviewerDirectory>,
        events: Arc<dyn EventSink>,
        settings: EngineSettings,
    ) -> Self {
        let registry = WorkflowRegistry::new(workflows.clone(), reviewers.clone());
        Self {
            submissions: SubmissionService::new(
                registry.clone(),
                items.clone(),
                events.clone(),
                settings,
            ),
            decisions: DecisionProcessor::new(
                workflows,
                items.clone(),
                reviewers,
                events.clone(),
                settings.max_decision_attempts,
            ),
            overdue: OverdueScanner::new(
                items.clone(),
                events,
                settings.overdue_batch_size,
                settings.max_decision_attempts,
            ),
            stats: StatsAggregator::new(items),
            registry,
        }
    }
}
