//! Workflow definition and execution endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::state::AppState;
use crate::api::types::{ApiError, Json};
use crate::domain::conversation::ConversationTurn;
use crate::domain::workflow::{ExecutionKey, Workflow, WorkflowState};

/// Request to start an execution of a workflow
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExecutionRequest {
    pub user_id: String,
    pub call_id: String,
}

/// New conversation turns for an execution
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationUpdateRequest {
    #[serde(default)]
    pub turns: Vec<ConversationTurn>,
}

/// Message to speak for an execution's current node
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMessageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
    pub is_complete: bool,
}

/// POST /v1/workflows
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(workflow): Json<Workflow>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    debug!(workflow_id = %workflow.id(), "Creating workflow");

    let created = state.engine.create_workflow(workflow).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/workflows/{workflow_id}
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let workflow = state.engine.get_workflow(&workflow_id).await?;

    Ok(Json(workflow.as_ref().clone()))
}

/// POST /v1/workflows/{workflow_id}/executions
pub async fn start_execution(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Json(request): Json<StartExecutionRequest>,
) -> Result<Json<WorkflowState>, ApiError> {
    if request.user_id.is_empty() || request.call_id.is_empty() {
        return Err(ApiError::bad_request("userId and callId must not be empty"));
    }

    let key = ExecutionKey::new(workflow_id, request.user_id, request.call_id);
    let execution = state.engine.start_workflow(&key).await?;

    info!(execution = %key, "Execution started via API");
    Ok(Json(execution))
}

/// GET /v1/workflows/{workflow_id}/executions/{user_id}/{call_id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path((workflow_id, user_id, call_id)): Path<(String, String, String)>,
) -> Result<Json<WorkflowState>, ApiError> {
    state.engine.get_workflow(&workflow_id).await?;

    let key = ExecutionKey::new(workflow_id, user_id, call_id);
    let execution = state.engine.get_workflow_state(&key).await?;

    Ok(Json(execution))
}

/// GET /v1/workflows/{workflow_id}/executions/{user_id}/{call_id}/message
pub async fn get_current_message(
    State(state): State<AppState>,
    Path((workflow_id, user_id, call_id)): Path<(String, String, String)>,
) -> Result<Json<NodeMessageResponse>, ApiError> {
    let key = ExecutionKey::new(workflow_id, user_id, call_id);
    let cancel = state.request_token();
    let _guard = cancel.clone().drop_guard();

    let message = state.engine.get_current_node_message(&key, &cancel).await?;
    let execution = state.engine.get_workflow_state(&key).await?;

    Ok(Json(NodeMessageResponse {
        node_id: execution.current_node_id,
        message,
        is_complete: execution.is_complete,
    }))
}

/// POST /v1/workflows/{workflow_id}/executions/{user_id}/{call_id}/updates
pub async fn process_update(
    State(state): State<AppState>,
    Path((workflow_id, user_id, call_id)): Path<(String, String, String)>,
    Json(request): Json<ConversationUpdateRequest>,
) -> Result<Json<WorkflowState>, ApiError> {
    let key = ExecutionKey::new(workflow_id, user_id, call_id);
    let cancel = state.request_token();
    let _guard = cancel.clone().drop_guard();

    let execution = state
        .engine
        .process_conversation_update(&key, &request.turns, &cancel)
        .await?;

    Ok(Json(execution))
}
