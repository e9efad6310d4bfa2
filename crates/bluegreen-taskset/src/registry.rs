//! Task-set registry.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use bluegreen_core::{InstanceHandle, PoolColor, PoolId};

use crate::error::{TaskSetError, TaskSetResult};

/// Lifecycle of a pool's task set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskSetStatus {
    Provisioning,
    Active,
    /// Traffic has moved away; instances stay up until `terminate_at`.
    Draining { terminate_at: u64 },
    Terminated,
}

/// Instances and counters for one pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSet {
    pub pool_id: PoolId,
    pub color: PoolColor,
    pub instances: Vec<InstanceHandle>,
    pub desired_count: u32,
    pub observed_count: u32,
    /// Traffic weight the pool is currently serving (0-100).
    pub weight: u32,
    pub status: TaskSetStatus,
}

/// Result of a `terminate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The grace window has not elapsed; nothing was touched.
    Deferred { remaining_secs: u64 },
    /// The pool is gone. The caller must stop these instances.
    Terminated { instances: Vec<InstanceHandle> },
}

#[derive(Debug, Default)]
pub struct TaskSetRegistry {
    sets: HashMap<PoolId, TaskSet>,
}

impl TaskSetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record for a pool that is about to be provisioned.
    pub fn begin_provisioning(
        &mut self,
        pool_id: &str,
        color: PoolColor,
        desired_count: u32,
    ) -> TaskSetResult<()> {
        if let Some(existing) = self.sets.get(pool_id) {
            if existing.status == TaskSetStatus::Terminated {
                return Err(TaskSetError::AlreadyTerminated(pool_id.to_string()));
            }
            return Ok(());
        }
        self.sets.insert(
            pool_id.to_string(),
            TaskSet {
                pool_id: pool_id.to_string(),
                color,
                instances: Vec::new(),
                desired_count,
                observed_count: 0,
                weight: 0,
                status: TaskSetStatus::Provisioning,
            },
        );
        debug!(pool = %pool_id, %color, desired_count, "task set provisioning");
        Ok(())
    }

    /// Replace the instance set of a pool.
    ///
    /// Fails with `ConflictingRegistration` if the pool is serving traffic
    /// outside of provisioning.
    pub fn register(&mut self, pool_id: &str, instances: Vec<InstanceHandle>) -> TaskSetResult<()> {
        let set = self.get_mut(pool_id)?;
        match set.status {
            TaskSetStatus::Terminated => {
                return Err(TaskSetError::AlreadyTerminated(pool_id.to_string()));
            }
            TaskSetStatus::Provisioning => {}
            _ if set.weight > 0 => {
                return Err(TaskSetError::ConflictingRegistration(pool_id.to_string()));
            }
            _ => {}
        }
        set.observed_count = instances.len() as u32;
        set.instances = instances;
        debug!(pool = %pool_id, count = set.observed_count, "task set registered");
        Ok(())
    }

    /// Mark a provisioned pool as ready to take traffic.
    pub fn activate(&mut self, pool_id: &str) -> TaskSetResult<()> {
        let set = self.get_mut(pool_id)?;
        if set.status == TaskSetStatus::Terminated {
            return Err(TaskSetError::AlreadyTerminated(pool_id.to_string()));
        }
        if set.status == TaskSetStatus::Provisioning {
            set.status = TaskSetStatus::Active;
        }
        Ok(())
    }

    /// Record the traffic weight a pool now serves.
    pub fn set_weight(&mut self, pool_id: &str, weight: u32) -> TaskSetResult<()> {
        let set = self.get_mut(pool_id)?;
        set.weight = weight;
        Ok(())
    }

    /// Record how many instances are actually running.
    pub fn observe(&mut self, pool_id: &str, running: u32) -> TaskSetResult<()> {
        let set = self.get_mut(pool_id)?;
        if set.observed_count != running {
            debug!(
                pool = %pool_id,
                desired = set.desired_count,
                observed = running,
                "task set count changed"
            );
        }
        set.observed_count = running;
        Ok(())
    }

    /// Mark a pool for teardown `after_secs` from `now`. Returns the
    /// deadline. Rescheduling replaces the previous deadline.
    pub fn schedule_termination(
        &mut self,
        pool_id: &str,
        after_secs: u64,
        now: u64,
    ) -> TaskSetResult<u64> {
        let set = self.get_mut(pool_id)?;
        if set.status == TaskSetStatus::Terminated {
            return Err(TaskSetError::AlreadyTerminated(pool_id.to_string()));
        }
        let terminate_at = now.saturating_add(after_secs);
        set.status = TaskSetStatus::Draining { terminate_at };
        info!(pool = %pool_id, terminate_at, "task set scheduled for termination");
        Ok(terminate_at)
    }

    /// Tear a pool down. Irreversible.
    ///
    /// A draining pool whose deadline is still in the future is left
    /// untouched and `Deferred` is returned.
    pub fn terminate(&mut self, pool_id: &str, now: u64) -> TaskSetResult<TerminateOutcome> {
        let set = self.get_mut(pool_id)?;
        match set.status {
            TaskSetStatus::Terminated => Err(TaskSetError::AlreadyTerminated(pool_id.to_string())),
            TaskSetStatus::Draining { terminate_at } if now < terminate_at => {
                Ok(TerminateOutcome::Deferred {
                    remaining_secs: terminate_at - now,
                })
            }
            _ => {
                set.status = TaskSetStatus::Terminated;
                set.weight = 0;
                set.observed_count = 0;
                let instances = std::mem::take(&mut set.instances);
                info!(pool = %pool_id, count = instances.len(), "task set terminated");
                Ok(TerminateOutcome::Terminated { instances })
            }
        }
    }

    /// Draining pools whose deadline has passed, in pool id order.
    pub fn due(&self, now: u64) -> Vec<PoolId> {
        let mut due: Vec<PoolId> = self
            .sets
            .values()
            .filter(|s| matches!(s.status, TaskSetStatus::Draining { terminate_at } if terminate_at <= now))
            .map(|s| s.pool_id.clone())
            .collect();
        due.sort();
        due
    }

    pub fn get(&self, pool_id: &str) -> Option<&TaskSet> {
        self.sets.get(pool_id)
    }

    /// Drop the record for a terminated pool. Returns true if removed.
    pub fn forget(&mut self, pool_id: &str) -> bool {
        if self
            .sets
            .get(pool_id)
            .is_some_and(|s| s.status == TaskSetStatus::Terminated)
        {
            self.sets.remove(pool_id);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    fn get_mut(&mut self, pool_id: &str) -> TaskSetResult<&mut TaskSet> {
        self.sets
            .get_mut(pool_id)
            .ok_or_else(|| TaskSetError::UnknownPool(pool_id.to_string()))
    }
}
