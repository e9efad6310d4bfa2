//! Shared types used across the blue/green crates.

use serde::{Deserialize, Serialize};

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Unique identifier for a target pool (task set).
pub type PoolId = String;

/// Opaque handle for one backend instance (e.g. a task ARN).
pub type InstanceHandle = String;

/// Which side of a blue/green pair a pool is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolColor {
    /// The pool currently serving production traffic.
    Blue,
    /// The replacement pool receiving shifted traffic.
    Green,
}

impl PoolColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolColor::Blue => "blue",
            PoolColor::Green => "green",
        }
    }
}

impl std::fmt::Display for PoolColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health verdict for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// One aggregated datapoint for a pool over a sampling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub pool_id: PoolId,
    /// Unix timestamp (seconds) at the end of the sampling window.
    pub timestamp: u64,
    /// Average unhealthy host count over the window.
    pub unhealthy_hosts: u32,
    /// Sum of target 5xx responses over the window.
    pub http_5xx: u32,
    /// Length of the sampling window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    300
}

/// What to run in one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    /// Image reference or task definition revision.
    pub revision: String,
    /// Number of instances the pool should run.
    pub desired_count: u32,
}

/// Pool specs for both sides of a deployment.
///
/// `blue` is only provisioned when the application has no live pool yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolsSpec {
    pub blue: PoolSpec,
    pub green: PoolSpec,
}

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Created,
    Provisioning,
    Shifting,
    Completing,
    Complete,
    RollingBack,
    RolledBack,
    Failed,
}

impl DeploymentState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Complete | DeploymentState::RolledBack | DeploymentState::Failed
        )
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, to),
            (Created, Provisioning)
                | (Provisioning, Shifting)
                | (Provisioning, Failed)
                | (Shifting, Completing)
                | (Shifting, Failed)
                | (Completing, Complete)
                | (Created | Provisioning | Shifting | Completing, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, Failed)
        )
    }

    /// Terminal outcome for this state, if any.
    pub fn outcome(&self) -> Option<DeploymentOutcome> {
        match self {
            DeploymentState::Complete => Some(DeploymentOutcome::Succeeded),
            DeploymentState::RolledBack => Some(DeploymentOutcome::RolledBack),
            DeploymentState::Failed => Some(DeploymentOutcome::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Created => "CREATED",
            DeploymentState::Provisioning => "PROVISIONING",
            DeploymentState::Shifting => "SHIFTING",
            DeploymentState::Completing => "COMPLETING",
            DeploymentState::Complete => "COMPLETE",
            DeploymentState::RollingBack => "ROLLING_BACK",
            DeploymentState::RolledBack => "ROLLED_BACK",
            DeploymentState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOutcome {
    Succeeded,
    RolledBack,
    Failed,
}

/// What caused a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    /// A health alarm tripped.
    Alarm,
    /// An operator asked for it.
    Request,
    /// The deployment itself failed (e.g. a weight update was rejected).
    Failure,
}

/// Seconds since the unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
