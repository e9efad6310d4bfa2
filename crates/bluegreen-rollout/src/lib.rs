//! Blue/green deployments: shift plans, state machine, traffic shifter.
//!
//! This crate moves traffic from the live (blue) pool to a replacement
//! (green) pool in plan-defined steps, gating every step on the health of
//! both pools and rolling back when either trips.
//!
//! # Components
//!
//! - **`plan`**: Shift plans and named presets (linear, canary, all-at-once)
//! - **`shifter`**: Decides the next traffic split on each tick
//! - **`machine`**: Deployment lifecycle (advance, rollback, fail)
//! - **`controller`**: Drives deployments against the weight setter,
//!   provisioner, health gates and task-set registry

pub mod controller;
pub mod error;
pub mod machine;
pub mod plan;
pub mod shifter;

pub use controller::DeploymentController;
pub use error::{RolloutError, RolloutResult};
pub use machine::Deployment;
pub use plan::{DeploymentPreset, PlanError, PlanRequest, ShiftPlan, ShiftStep};
pub use shifter::{ShiftDecision, TrafficShifter, TrafficSplit};

/// Status snapshot reported for a deployment.
pub type DeploymentStatus = bluegreen_state::DeploymentRecord;
