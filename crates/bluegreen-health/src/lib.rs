//! bluegreen-health: the health gate for blue/green deployments.
//!
//! Each deployment owns one `HealthGate`. The gate keeps a bounded rolling
//! window of `HealthSample`s per pool and evaluates two alarms against it:
//! unhealthy host count and target 5xx count.
//!
//! # Architecture
//!
//! ```text
//! HealthGate (one per deployment, Mutex-guarded)
//!   ├── PoolWindow (blue)
//!   │   ├── AlarmDefinition {app}blueUnhealthyHostAlarm
//!   │   └── AlarmDefinition {app}blue5xxAlarm
//!   └── PoolWindow (green)
//!       ├── AlarmDefinition {app}greenUnhealthyHostAlarm
//!       └── AlarmDefinition {app}green5xxAlarm
//! ```
//!
//! # Stickiness
//!
//! A tripped alarm is recorded at ingest time and never cleared. Once a
//! pool is `Unhealthy` it stays that way for the rest of the deployment,
//! even after the breaching samples leave the window.

pub mod alarms;
pub mod gate;

pub use alarms::{AlarmDefinition, AlarmMetric, application_alarms, pool_alarms};
pub use gate::{HealthError, HealthGate};
