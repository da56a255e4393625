//! JSON API for the approval engine.
//!
//! Endpoints (all under `/api/v1`):
//! - `POST /approvals/submit`                — submit an item for approval (201)
//! - `POST /approvals/decide`                — record the caller's decision
//! - `POST /approvals/cancel`                — cancel an item still awaiting action
//! - `GET  /approvals`                       — dashboard listing (`status=pending|all`, `limit`)
//! - `GET  /approvals/stats`                 — dashboard counts
//! - `GET  /approvals/{id}`                  — item plus decision trail
//! - `POST /workflows`                       — create a workflow
//! - `GET  /workflows`                       — list workflows
//! - `GET  /workflows/{id}`                  — fetch one workflow
//! - `PUT  /workflows/{id}`                  — publish a new version
//! - `POST /workflows/{id}/deactivate`       — stop accepting submissions

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signoff_core::{
    ApprovalEngine, ApprovalError, ApprovalItem, ApprovalItemId, ApprovalStats, ApprovalWorkflow,
    ClientId, DecisionCommand, DecisionKind, InterfaceError, ItemDetail, SubmissionRequest,
    WorkflowDraft, WorkflowId,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::identity::{Caller, IdentityError, IdentityResolver};

#[derive(Clone)]
pub struct ApiState {
    engine: ApprovalEngine,
    identity: Arc<dyn IdentityResolver>,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub item_id: String,
    pub decision: String,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub item_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListItemsParams {
    pub status: Option<String>,
    pub client_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub client_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListWorkflowsParams {
    pub client_id: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized { message: String, correlation_id: String },
    BadRequest { message: String, correlation_id: String },
    Forbidden { message: String, correlation_id: String },
    Engine(InterfaceError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::BadRequest { message: message.into(), correlation_id: correlation_id.to_string() }
    }

    fn forbidden(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::Forbidden { message: message.into(), correlation_id: correlation_id.to_string() }
    }

    fn engine(error: ApprovalError, correlation_id: &str) -> Self {
        Self::Engine(error.into_interface(correlation_id))
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Engine(InterfaceError::Unprocessable { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Engine(InterfaceError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            Self::Engine(InterfaceError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Engine(InterfaceError::Conflict { .. }) => StatusCode::CONFLICT,
            Self::Engine(InterfaceError::ServiceUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn body(self) -> ErrorBody {
        match self {
            Self::Unauthorized { message, correlation_id } => {
                ErrorBody { error: "unauthenticated".to_string(), message, correlation_id }
            }
            Self::BadRequest { message, correlation_id } => {
                ErrorBody { error: "bad_request".to_string(), message, correlation_id }
            }
            Self::Forbidden { message, correlation_id } => {
                ErrorBody { error: "forbidden".to_string(), message, correlation_id }
            }
            Self::Engine(error) => {
                let code = error.code().to_string();
                let safe_message = error.user_message();
                match error {
                    // Store failures can carry driver detail; callers only get the safe text.
                    InterfaceError::ServiceUnavailable { correlation_id, .. } => {
                        ErrorBody { error: code, message: safe_message.to_string(), correlation_id }
                    }
                    InterfaceError::Unprocessable { message, correlation_id, .. }
                    | InterfaceError::Forbidden { message, correlation_id, .. }
                    | InterfaceError::NotFound { message, correlation_id, .. }
                    | InterfaceError::Conflict { message, correlation_id, .. } => {
                        ErrorBody { error: code, message, correlation_id }
                    }
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();
        if status.is_server_error() {
            warn!(
                event_name = "api.request.failed",
                correlation_id = %body.correlation_id,
                error_code = %body.error,
                status = status.as_u16(),
                "request failed with server-side error"
            );
        }
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(engine: ApprovalEngine, identity: Arc<dyn IdentityResolver>) -> Router {
    Router::new()
        .route("/api/v1/approvals", get(list_items))
        .route("/api/v1/approvals/submit", post(submit_item))
        .route("/api/v1/approvals/decide", post(decide_item))
        .route("/api/v1/approvals/cancel", post(cancel_item))
        .route("/api/v1/approvals/stats", get(item_stats))
        .route("/api/v1/approvals/{id}", get(get_item))
        .route("/api/v1/workflows", get(list_workflows).post(create_workflow))
        .route("/api/v1/workflows/{id}", get(get_workflow).put(update_workflow))
        .route("/api/v1/workflows/{id}/deactivate", post(deactivate_workflow))
        .with_state(ApiState { engine, identity })
}

fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4())
}

fn authenticate(state: &ApiState, headers: &HeaderMap, correlation_id: &str) -> Result<Caller, ApiError> {
    state.identity.resolve(headers).map_err(|error: IdentityError| {
        warn!(
            event_name = "api.identity.rejected",
            correlation_id = %correlation_id,
            reason = %error,
            "request rejected by identity resolver"
        );
        ApiError::Unauthorized {
            message: error.to_string(),
            correlation_id: correlation_id.to_string(),
        }
    })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>, correlation_id: &str) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        ApiError::bad_request(rejection.body_text(), correlation_id)
    })
}

fn params<T>(query: Result<Query<T>, QueryRejection>, correlation_id: &str) -> Result<T, ApiError> {
    query.map(|Query(value)| value).map_err(|rejection| {
        ApiError::bad_request(rejection.body_text(), correlation_id)
    })
}

fn client_param(raw: Option<String>) -> Option<ClientId> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(ClientId)
}

fn require_tenant(
    caller: &Caller,
    client_id: Option<&ClientId>,
    correlation_id: &str,
) -> Result<(), ApiError> {
    if caller.can_access(client_id) {
        return Ok(());
    }
    Err(ApiError::forbidden(
        format!(
            "`{}` has no access to client `{}`",
            caller.actor_id,
            client_id.map(|client| client.0.as_str()).unwrap_or_default()
        ),
        correlation_id,
    ))
}

/// Loads an item the caller is allowed to see. Items of other tenants are reported as missing
/// so their ids cannot be probed.
async fn visible_item(
    state: &ApiState,
    caller: &Caller,
    id: &ApprovalItemId,
    correlation_id: &str,
) -> Result<ApprovalItem, ApiError> {
    let item =
        state.engine.submissions.get(id).await.map_err(|error| ApiError::engine(error, correlation_id))?;
    if caller.can_access(item.client_id.as_ref()) {
        Ok(item)
    } else {
        Err(ApiError::engine(
            ApprovalError::NotFound { entity: "approval item", id: id.0.clone() },
            correlation_id,
        ))
    }
}

async fn visible_workflow(
    state: &ApiState,
    caller: &Caller,
    id: &WorkflowId,
    correlation_id: &str,
) -> Result<ApprovalWorkflow, ApiError> {
    let workflow =
        state.engine.registry.get(id).await.map_err(|error| ApiError::engine(error, correlation_id))?;
    if caller.can_access(workflow.client_id.as_ref()) {
        Ok(workflow)
    } else {
        Err(ApiError::engine(
            ApprovalError::NotFound { entity: "workflow", id: id.0.clone() },
            correlation_id,
        ))
    }
}

// ---------------------------------------------------------------------------
// Approval items
// ---------------------------------------------------------------------------

async fn submit_item(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<SubmissionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApprovalItem>), ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let request = body(payload, &correlation_id)?;
    require_tenant(&caller, request.client_id.as_ref(), &correlation_id)?;

    let item = state
        .engine
        .submissions
        .submit(request, caller.actor_id.clone())
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;

    info!(
        event_name = "api.approvals.submitted",
        correlation_id = %correlation_id,
        item_id = %item.id,
        actor_id = %caller.actor_id,
        "approval item accepted"
    );
    Ok((StatusCode::CREATED, Json(item)))
}

async fn decide_item(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<DecideRequest>, JsonRejection>,
) -> Result<Json<ApprovalItem>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let request = body(payload, &correlation_id)?;

    let decision = DecisionKind::parse(&request.decision).ok_or_else(|| {
        ApiError::bad_request(
            format!(
                "unknown decision `{}`; expected approved, rejected or request_changes",
                request.decision
            ),
            &correlation_id,
        )
    })?;

    let item_id = ApprovalItemId(request.item_id);
    visible_item(&state, &caller, &item_id, &correlation_id).await?;

    let item = state
        .engine
        .decisions
        .decide(DecisionCommand {
            item_id,
            approver_id: caller.actor_id.clone(),
            decision,
            comments: request.comments,
        })
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;

    info!(
        event_name = "api.approvals.decided",
        correlation_id = %correlation_id,
        item_id = %item.id,
        approver_id = %caller.actor_id,
        decision = decision.as_str(),
        status = %item.status,
        "approval decision accepted"
    );
    Ok(Json(item))
}

async fn cancel_item(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<ApprovalItem>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let request = body(payload, &correlation_id)?;

    let item_id = ApprovalItemId(request.item_id);
    visible_item(&state, &caller, &item_id, &correlation_id).await?;

    let item = state
        .engine
        .submissions
        .cancel(&item_id, &caller.actor_id)
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;
    Ok(Json(item))
}

async fn list_items(
    State(state): State<ApiState>,
    headers: HeaderMap,
    query: Result<Query<ListItemsParams>, QueryRejection>,
) -> Result<Json<Vec<ApprovalItem>>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let params = params(query, &correlation_id)?;

    let client_id = client_param(params.client_id);
    match &client_id {
        Some(client) => require_tenant(&caller, Some(client), &correlation_id)?,
        None if !caller.is_unrestricted() => {
            return Err(ApiError::forbidden(
                "client_id is required unless the caller has access to every tenant",
                &correlation_id,
            ));
        }
        None => {}
    }

    let submissions = &state.engine.submissions;
    let items = match params.status.as_deref().map(str::trim).unwrap_or("pending") {
        "pending" => submissions.list_pending(client_id.as_ref(), params.limit).await,
        "all" => submissions.list_all(client_id.as_ref(), params.limit).await,
        other => {
            return Err(ApiError::bad_request(
                format!("unknown status filter `{other}`; expected pending or all"),
                &correlation_id,
            ));
        }
    }
    .map_err(|error| ApiError::engine(error, &correlation_id))?;

    Ok(Json(items))
}

async fn item_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
    query: Result<Query<StatsParams>, QueryRejection>,
) -> Result<Json<ApprovalStats>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let params = params(query, &correlation_id)?;

    let client_id = client_param(params.client_id);
    match &client_id {
        Some(client) => require_tenant(&caller, Some(client), &correlation_id)?,
        None if !caller.is_unrestricted() => {
            return Err(ApiError::forbidden(
                "cross-tenant stats require access to every tenant",
                &correlation_id,
            ));
        }
        None => {}
    }

    let stats = state
        .engine
        .stats
        .stats(client_id.as_ref(), params.since, Utc::now())
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;
    Ok(Json(stats))
}

async fn get_item(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ItemDetail>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;

    let item_id = ApprovalItemId(id);
    visible_item(&state, &caller, &item_id, &correlation_id).await?;
    let detail = state
        .engine
        .submissions
        .get_detail(&item_id)
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;
    Ok(Json(detail))
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

async fn create_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<WorkflowDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<ApprovalWorkflow>), ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let draft = body(payload, &correlation_id)?;
    require_workflow_scope(&caller, draft.client_id.as_ref(), &correlation_id)?;

    let workflow = state
        .engine
        .registry
        .create_workflow(draft)
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn list_workflows(
    State(state): State<ApiState>,
    headers: HeaderMap,
    query: Result<Query<ListWorkflowsParams>, QueryRejection>,
) -> Result<Json<Vec<ApprovalWorkflow>>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let params = params(query, &correlation_id)?;

    let client_id = client_param(params.client_id);
    if let Some(client) = &client_id {
        require_tenant(&caller, Some(client), &correlation_id)?;
    }

    let workflows = state
        .engine
        .registry
        .list(client_id.as_ref())
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;
    Ok(Json(
        workflows
            .into_iter()
            .filter(|workflow| caller.can_access(workflow.client_id.as_ref()))
            .collect(),
    ))
}

async fn get_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let workflow = visible_workflow(&state, &caller, &WorkflowId(id), &correlation_id).await?;
    Ok(Json(workflow))
}

async fn update_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<WorkflowDraft>, JsonRejection>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;
    let draft = body(payload, &correlation_id)?;

    let current = visible_workflow(&state, &caller, &WorkflowId(id), &correlation_id).await?;
    require_workflow_scope(&caller, current.client_id.as_ref(), &correlation_id)?;

    let workflow = state
        .engine
        .registry
        .update_workflow(&current.id, draft)
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;
    Ok(Json(workflow))
}

async fn deactivate_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApprovalWorkflow>, ApiError> {
    let correlation_id = correlation_id();
    let caller = authenticate(&state, &headers, &correlation_id)?;

    let current = visible_workflow(&state, &caller, &WorkflowId(id), &correlation_id).await?;
    require_workflow_scope(&caller, current.client_id.as_ref(), &correlation_id)?;

    let workflow = state
        .engine
        .registry
        .deactivate(&current.id)
        .await
        .map_err(|error| ApiError::engine(error, &correlation_id))?;
    Ok(Json(workflow))
}

/// Global workflows affect every tenant, so only unrestricted callers may change them.
fn require_workflow_scope(
    caller: &Caller,
    client_id: Option<&ClientId>,
    correlation_id: &str,
) -> Result<(), ApiError> {
    match client_id {
        Some(client) => require_tenant(caller, Some(client), correlation_id),
        None if caller.is_unrestricted() => Ok(()),
        None => Err(ApiError::forbidden(
            "global workflows can only be managed by callers with access to every tenant",
            correlation_id,
        )),
    }
}
