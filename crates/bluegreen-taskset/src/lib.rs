//! bluegreen-taskset: tracks the backend instances behind each pool.
//!
//! The registry records, per pool, the instance handles returned by the
//! provisioner, desired vs. observed counts, the traffic weight the pool
//! is serving, and where the pool is in its lifecycle:
//!
//! ```text
//! Provisioning ──activate──▶ Active ──schedule_termination──▶ Draining
//!                               │                               │
//!                               └──────────terminate────────────┴──▶ Terminated
//! ```
//!
//! A draining pool keeps its instances until its deadline passes, so
//! in-flight connections get a grace window after traffic has moved away.

pub mod error;
pub mod registry;

pub use error::{TaskSetError, TaskSetResult};
pub use registry::{TaskSet, TaskSetRegistry, TaskSetStatus, TerminateOutcome};
