//! REST API handlers.
//!
//! Each handler calls into the `DeploymentController` and wraps the
//! result in the `{success, data, error}` envelope. Controller calls are
//! short and synchronous, so handlers run them inline.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bluegreen_core::{HealthSample, HealthStatus, PoolId, PoolsSpec, epoch_secs};
use bluegreen_rollout::{PlanRequest, RolloutError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(err: &RolloutError) -> StatusCode {
    match err {
        RolloutError::InvalidPlan(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RolloutError::ConflictingDeployment { .. }
        | RolloutError::InvalidTransition { .. }
        | RolloutError::NotArchived(_) => StatusCode::CONFLICT,
        RolloutError::ProvisioningFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RolloutError::DeploymentNotFound(_) | RolloutError::UnknownPool(_) => StatusCode::NOT_FOUND,
        RolloutError::TaskSet(_) | RolloutError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rollout_error(err: RolloutError) -> Response {
    error_response(&err.to_string(), status_for(&err))
}

// ── Deployments ────────────────────────────────────────────────

/// Request body to create a deployment.
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateDeploymentRequest {
    pub application: String,
    /// Shift plan. The configured preset is used when absent.
    #[serde(default)]
    pub plan: Option<PlanRequest>,
    pub pools: PoolsSpec,
    /// Creation time override (unix seconds).
    #[serde(default)]
    pub now: Option<u64>,
}

/// Response body for a created deployment.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedDeployment {
    pub id: String,
}

/// GET /api/v1/deployments
pub async fn list_deployments(State(state): State<ApiState>) -> Response {
    match state.controller.list() {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => rollout_error(e),
    }
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.controller.get_status(&id) {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => rollout_error(e),
    }
}

/// DELETE /api/v1/deployments/{id}
pub async fn purge_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.controller.purge(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => rollout_error(e),
    }
}

/// POST /api/v1/deployments
pub async fn create_deployment(
    State(state): State<ApiState>,
    Json(req): Json<CreateDeploymentRequest>,
) -> Response {
    let controller = &state.controller;
    let plan = req.plan.unwrap_or_else(|| controller.default_plan());
    let now = req.now.unwrap_or_else(epoch_secs);
    match controller.create_deployment(&req.application, plan, &req.pools, now) {
        Ok(id) => {
            info!(deployment = %id, application = %req.application, "deployment created via API");
            (StatusCode::CREATED, ApiResponse::ok(CreatedDeployment { id })).into_response()
        }
        Err(e) => {
            warn!(application = %req.application, error = %e, "create deployment rejected");
            rollout_error(e)
        }
    }
}

/// Optional clock override for control calls.
#[derive(Debug, Default, Deserialize)]
pub struct ClockParams {
    pub now: Option<u64>,
}

/// POST /api/v1/deployments/{id}/tick
pub async fn tick_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ClockParams>,
) -> Response {
    let now = params.now.unwrap_or_else(epoch_secs);
    match state.controller.tick(&id, now) {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => rollout_error(e),
    }
}

/// Request body to force a rollback.
#[derive(Debug, Deserialize, Serialize)]
pub struct RollbackRequest {
    pub reason: String,
    #[serde(default)]
    pub now: Option<u64>,
}

/// POST /api/v1/deployments/{id}/rollback
pub async fn rollback_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> Response {
    let now = req.now.unwrap_or_else(epoch_secs);
    match state.controller.force_rollback(&id, &req.reason, now) {
        Ok(status) => ApiResponse::ok(status).into_response(),
        Err(e) => rollout_error(e),
    }
}

/// GET /api/v1/deployments/{id}/history
pub async fn get_history(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.controller.history(&id) {
        Ok(history) => ApiResponse::ok(history).into_response(),
        Err(e) => rollout_error(e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// Verdict returned after ingesting a sample.
#[derive(Debug, Serialize, Deserialize)]
pub struct SampleVerdict {
    pub pool_id: PoolId,
    pub status: HealthStatus,
}

/// POST /api/v1/samples
pub async fn ingest_sample(
    State(state): State<ApiState>,
    Json(sample): Json<HealthSample>,
) -> Response {
    let pool_id = sample.pool_id.clone();
    match state.controller.ingest_sample(sample) {
        Ok(status) => ApiResponse::ok(SampleVerdict { pool_id, status }).into_response(),
        Err(e) => rollout_error(e),
    }
}

// ── Pools ──────────────────────────────────────────────────────

/// GET /api/v1/pools/{id}
pub async fn get_pool(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.controller.task_set(&id) {
        Some(set) => ApiResponse::ok(set).into_response(),
        None => error_response(&format!("unknown pool: {id}"), StatusCode::NOT_FOUND),
    }
}

/// Instance count reported by whatever watches the scheduler.
#[derive(Debug, Deserialize, Serialize)]
pub struct ObservedCount {
    pub running: u32,
}

/// POST /api/v1/pools/{id}/observed
pub async fn observe_pool(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ObservedCount>,
) -> Response {
    match state.controller.observe_pool(&id, req.running) {
        Ok(set) => ApiResponse::ok(set).into_response(),
        Err(e) => rollout_error(e),
    }
}

/// GET /api/v1/applications/{app}/alarms
pub async fn list_alarms(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    ApiResponse::ok(state.controller.alarms(&app)).into_response()
}
