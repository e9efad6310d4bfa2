use thiserror::Error;

use bluegreen_core::{DeploymentState, DriverError};
use bluegreen_state::StateError;
use bluegreen_taskset::TaskSetError;

use crate::plan::PlanError;

/// Errors returned by deployment controller operations.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("invalid shift plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("application {application} already has an active deployment ({active})")]
    ConflictingDeployment { application: String, active: String },

    #[error("provisioning failed for {application}: {source}")]
    ProvisioningFailure {
        application: String,
        #[source]
        source: DriverError,
    },

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("deployment {0} is not archived yet")]
    NotArchived(String),

    #[error("unknown pool: {0}")]
    UnknownPool(String),

    #[error("deployment {deployment} cannot move from {from} to {to}")]
    InvalidTransition {
        deployment: String,
        from: DeploymentState,
        to: DeploymentState,
    },

    #[error("task set error: {0}")]
    TaskSet(#[from] TaskSetError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;
