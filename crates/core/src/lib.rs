pub mod approvals;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;

pub use approvals::directory::{ReviewerDirectory, StaticReviewerDirectory};
pub use approvals::memory::InMemoryApprovalStore;
pub use approvals::overdue::{DrainReport, OverdueScanner, SweepReport};
pub use approvals::processor::{DecisionCommand, DecisionProcessor};
pub use approvals::registry::WorkflowRegistry;
pub use approvals::stats::{ApprovalStats, StatsAggregator};
pub use approvals::store::{ApprovalItemStore, StoreError, WorkflowStore};
pub use approvals::submission::{ItemDetail, SubmissionService};
pub use approvals::{ApprovalEngine, EngineSettings};
pub use domain::decision::{ApprovalDecision, DecisionId, DecisionKind};
pub use domain::item::{ApprovalItem, ApprovalItemId, ItemStatus, Priority, SubmissionRequest};
pub use domain::workflow::{
    ApprovalStep, ApprovalWorkflow, ApproverId, ClientId, WorkflowDraft, WorkflowId,
};
pub use errors::{ApprovalError, InterfaceError};
pub use events::{ApprovalEvent, ApprovalEventKind, EventSink, InMemoryEventSink, NoopEventSink};
