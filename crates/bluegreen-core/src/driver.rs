//! Collaborator traits implemented by infrastructure drivers.
//!
//! The controller never talks to a load balancer or a container scheduler
//! directly. It calls these traits, which must return promptly.

use thiserror::Error;

use crate::types::{InstanceHandle, PoolId, PoolSpec};

/// Errors reported by an infrastructure driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("weight update failed: {0}")]
    Weights(String),

    #[error("instance termination failed: {0}")]
    Terminate(String),
}

/// Applies traffic weights to the production and test routes.
pub trait WeightSetter: Send + Sync {
    /// Set both weights in one call. The weights always sum to 100.
    fn set_weights(
        &self,
        prod_pool: &PoolId,
        prod_weight: u32,
        test_pool: &PoolId,
        test_weight: u32,
    ) -> Result<(), DriverError>;
}

/// Starts and stops backend instances.
pub trait Provisioner: Send + Sync {
    fn provision(&self, spec: &PoolSpec) -> Result<Vec<InstanceHandle>, DriverError>;

    fn terminate_instances(&self, handles: &[InstanceHandle]) -> Result<(), DriverError>;
}
