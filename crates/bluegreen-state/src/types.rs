//! Persisted record types.
//!
//! A `DeploymentRecord` is the status snapshot the controller reports for
//! a deployment; the store keeps the latest one per deployment id.

use serde::{Deserialize, Serialize};

use bluegreen_core::{
    DeploymentId, DeploymentOutcome, DeploymentState, HealthStatus, PoolId, RollbackTrigger,
};

/// Last health verdict seen for each pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolVerdicts {
    pub blue: HealthStatus,
    pub green: HealthStatus,
}

impl Default for PoolVerdicts {
    fn default() -> Self {
        Self {
            blue: HealthStatus::Healthy,
            green: HealthStatus::Healthy,
        }
    }
}

/// Why and when a deployment was rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub trigger: RollbackTrigger,
    pub reason: String,
    /// Unix timestamp of the rollback request.
    pub at: u64,
}

/// Point-in-time view of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub application: String,
    pub state: DeploymentState,
    pub blue_pool: PoolId,
    pub green_pool: PoolId,
    pub blue_weight: u32,
    pub green_weight: u32,
    /// Shift steps applied so far.
    pub steps_applied: usize,
    /// Total steps in the plan.
    pub total_steps: usize,
    pub last_verdicts: PoolVerdicts,
    pub outcome: Option<DeploymentOutcome>,
    pub rollback: Option<RollbackRecord>,
    /// Why the deployment failed, when it did.
    pub failure_reason: Option<String>,
    /// Set once the retired pool has been terminated.
    pub archived: bool,
    /// Seconds the retired pool stays alive after completion.
    pub termination_wait_secs: u64,
    /// Unix timestamp when the deployment was created.
    pub created_at: u64,
    /// Unix timestamp of the last state change or shift.
    pub updated_at: u64,
}

/// One transition in a deployment's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeRecord {
    pub deployment_id: DeploymentId,
    /// Position of this change in the deployment's history, from zero.
    pub seq: u32,
    pub from: DeploymentState,
    pub to: DeploymentState,
    /// Unix timestamp of the transition.
    pub at: u64,
}

impl StateChangeRecord {
    /// Build the composite key for the history table.
    pub fn table_key(&self) -> String {
        format!("{}:{:010}", self.deployment_id, self.seq)
    }
}
