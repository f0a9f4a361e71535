//! Tree edit endpoints: propose, apply, assist, snapshot and export.

use crate::error::{ApiError, ApiResult};
use crate::extractors::{ActingUser, TreePath};
use crate::state::AppState;
use arbor_core::{ConversationTurn, ExecutionReport, Plan, PlanMode, TreeExport, TreeSnapshot};
use arbor_planner::AssistOutcome;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRequest {
    pub query: String,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub mode: PlanMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub plan: Plan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub mode: PlanMode,
    /// Apply the plan in the same request.
    #[serde(default)]
    pub auto_apply: bool,
}

fn require_query(query: &str) -> ApiResult<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::invalid_input("query must not be empty"));
    }
    Ok(query)
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /api/v1/trees/:tree_id/plan
pub async fn propose_plan(
    State(state): State<AppState>,
    TreePath(tree_id): TreePath,
    ActingUser(user): ActingUser,
    Json(req): Json<PlanRequest>,
) -> ApiResult<Json<Plan>> {
    let query = require_query(&req.query)?;
    tracing::debug!(%tree_id, user_id = %user, mode = ?req.mode, "Plan requested");
    let plan = state
        .service
        .propose(tree_id, user, query, &req.history, req.mode)
        .await?;
    Ok(Json(plan))
}

/// POST /api/v1/trees/:tree_id/execute
pub async fn execute_plan(
    State(state): State<AppState>,
    TreePath(tree_id): TreePath,
    ActingUser(user): ActingUser,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<Json<ExecutionReport>> {
    tracing::debug!(%tree_id, user_id = %user, operations = req.plan.operations.len(), "Execution requested");
    let report = state.service.apply(&req.plan, tree_id, user).await?;
    Ok(Json(report))
}

/// POST /api/v1/trees/:tree_id/assist
pub async fn assist(
    State(state): State<AppState>,
    TreePath(tree_id): TreePath,
    ActingUser(user): ActingUser,
    Json(req): Json<AssistRequest>,
) -> ApiResult<Json<AssistOutcome>> {
    let query = require_query(&req.query)?;
    let outcome = state
        .service
        .assist(tree_id, user, query, &req.history, req.mode, req.auto_apply)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/trees/:tree_id/snapshot
pub async fn snapshot(
    State(state): State<AppState>,
    TreePath(tree_id): TreePath,
    ActingUser(user): ActingUser,
) -> ApiResult<Json<TreeSnapshot>> {
    Ok(Json(state.service.snapshot(tree_id, user).await?))
}

/// GET /api/v1/trees/:tree_id/export
pub async fn export(
    State(state): State<AppState>,
    TreePath(tree_id): TreePath,
    ActingUser(user): ActingUser,
) -> ApiResult<Json<TreeExport>> {
    Ok(Json(state.service.export(tree_id, user).await?))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/:tree_id/plan", post(propose_plan))
        .route("/:tree_id/execute", post(execute_plan))
        .route("/:tree_id/assist", post(assist))
        .route("/:tree_id/snapshot", get(snapshot))
        .route("/:tree_id/export", get(export))
}
