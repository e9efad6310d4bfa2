//! bluegreen-api: REST API for the deployment controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/deployments` | List all deployments |
//! | POST | `/api/v1/deployments` | Create a deployment |
//! | GET | `/api/v1/deployments/{id}` | Get deployment status |
//! | DELETE | `/api/v1/deployments/{id}` | Purge an archived deployment |
//! | POST | `/api/v1/deployments/{id}/tick` | Run one control cycle |
//! | POST | `/api/v1/deployments/{id}/rollback` | Force a rollback |
//! | GET | `/api/v1/deployments/{id}/history` | List state changes |
//! | POST | `/api/v1/samples` | Ingest a health sample |
//! | GET | `/api/v1/pools/{id}` | Task set behind a pool |
//! | POST | `/api/v1/pools/{id}/observed` | Report running instances |
//! | GET | `/api/v1/applications/{app}/alarms` | Alarm definitions |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use bluegreen_rollout::DeploymentController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<DeploymentController>,
}

/// Build the complete API router.
pub fn build_router(controller: Arc<DeploymentController>) -> Router {
    let api_state = ApiState { controller };

    let api_routes = Router::new()
        .route("/deployments", get(handlers::list_deployments).post(handlers::create_deployment))
        .route(
            "/deployments/{id}",
            get(handlers::get_deployment).delete(handlers::purge_deployment),
        )
        .route("/deployments/{id}/tick", post(handlers::tick_deployment))
        .route("/deployments/{id}/rollback", post(handlers::rollback_deployment))
        .route("/deployments/{id}/history", get(handlers::get_history))
        .route("/samples", post(handlers::ingest_sample))
        .route("/pools/{id}", get(handlers::get_pool))
        .route("/pools/{id}/observed", post(handlers::observe_pool))
        .route("/applications/{app}/alarms", get(handlers::list_alarms))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
