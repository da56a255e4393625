use thiserror::Error;

use crate::approvals::store::StoreError;
use crate::domain::item::{ApprovalItemId, ItemStatus};
use crate::domain::workflow::{ApproverId, WorkflowValidationError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
    #[error("approver `{approver_id}` is not eligible for step {step_number} of item `{item_id}`")]
    NotAuthorized { item_id: ApprovalItemId, approver_id: ApproverId, step_number: u32 },
    #[error("approver `{approver_id}` already decided step {step_number} of item `{item_id}`")]
    DuplicateDecision { item_id: ApprovalItemId, approver_id: ApproverId, step_number: u32 },
    #[error("item `{item_id}` is already finalized as {status}")]
    AlreadyFinalized { item_id: ApprovalItemId, status: ItemStatus },
    #[error("item `{item_id}` cannot move from {from} to {to}")]
    InvalidTransition { item_id: ApprovalItemId, from: ItemStatus, to: ItemStatus },
    #[error("item `{item_id}` was modified concurrently ({attempts} attempts)")]
    ConcurrentModification { item_id: ApprovalItemId, attempts: u32 },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApprovalError {
    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidWorkflow(_) => "invalid_workflow",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::DuplicateDecision { .. } => "duplicate_decision",
            Self::AlreadyFinalized { .. } => "already_finalized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::NotFound { .. } => "not_found",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<WorkflowValidationError> for ApprovalError {
    fn from(value: WorkflowValidationError) -> Self {
        Self::InvalidWorkflow(value.to_string())
    }
}

impl From<StoreError> for ApprovalError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DuplicateDecision { item_id, approver_id, step_number } => {
                Self::DuplicateDecision { item_id, approver_id, step_number }
            }
            StoreError::Backend(message) | StoreError::Decode(message) => {
                Self::Persistence(message)
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("unprocessable: {message}")]
    Unprocessable { code: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { code: &'static str, message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unprocessable { code, .. }
            | Self::Forbidden { code, .. }
            | Self::NotFound { code, .. }
            | Self::Conflict { code, .. }
            | Self::ServiceUnavailable { code, .. } => code,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unprocessable { .. } => "The request was understood but is not valid.",
            Self::Forbidden { .. } => "You are not allowed to act on this approval step.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The approval item changed state. Reload it and review the current status."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }
}

impl From<ApprovalError> for InterfaceError {
    fn from(value: ApprovalError) -> Self {
        let code = value.code();
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApprovalError::InvalidWorkflow(_) => {
                Self::Unprocessable { code, message, correlation_id }
            }
            ApprovalError::NotAuthorized { .. } => Self::Forbidden { code, message, correlation_id },
            ApprovalError::NotFound { .. } => Self::NotFound { code, message, correlation_id },
            ApprovalError::DuplicateDecision { .. }
            | ApprovalError::AlreadyFinalized { .. }
            | ApprovalError::InvalidTransition { .. }
            | ApprovalError::ConcurrentModification { .. } => {
                Self::Conflict { code, message, correlation_id }
            }
            ApprovalError::Persistence(_) => {
                Self::ServiceUnavailable { code, message, correlation_id }
            }
        }
    }
}
