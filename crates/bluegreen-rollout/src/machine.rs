//! Deployment state machine: lifecycle of one blue/green deployment.
//!
//! The machine owns the shifter and the state, and records every
//! transition it makes. It never talks to infrastructure; the controller
//! drains the recorded transitions with `take_events` and acts on them.

use tracing::{info, warn};

use bluegreen_core::{DeploymentId, DeploymentState, PoolColor, PoolId, RollbackTrigger};
use bluegreen_state::{DeploymentRecord, PoolVerdicts, RollbackRecord, StateChangeRecord};

use crate::error::{RolloutError, RolloutResult};
use crate::plan::ShiftPlan;
use crate::shifter::{TrafficShifter, TrafficSplit};

/// A deployment in progress (or finished, until archived).
#[derive(Debug, Clone)]
pub struct Deployment {
    id: DeploymentId,
    application: String,
    blue_pool: PoolId,
    green_pool: PoolId,
    state: DeploymentState,
    shifter: TrafficShifter,
    termination_wait_secs: u64,
    last_verdicts: PoolVerdicts,
    rollback: Option<RollbackRecord>,
    failure_reason: Option<String>,
    archived: bool,
    created_at: u64,
    updated_at: u64,
    history: Vec<StateChangeRecord>,
    /// Index of the first history entry not yet handed out by `take_events`.
    unseen: usize,
}

impl Deployment {
    pub fn new(
        id: &str,
        application: &str,
        blue_pool: &str,
        green_pool: &str,
        plan: ShiftPlan,
        termination_wait_secs: u64,
        now: u64,
    ) -> Self {
        Self {
            id: id.to_string(),
            application: application.to_string(),
            blue_pool: blue_pool.to_string(),
            green_pool: green_pool.to_string(),
            state: DeploymentState::Created,
            shifter: TrafficShifter::new(plan, now),
            termination_wait_secs,
            last_verdicts: PoolVerdicts::default(),
            rollback: None,
            failure_reason: None,
            archived: false,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            unseen: 0,
        }
    }

    fn transition(&mut self, to: DeploymentState, now: u64) -> RolloutResult<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(RolloutError::InvalidTransition {
                deployment: self.id.clone(),
                from,
                to,
            });
        }
        self.state = to;
        self.updated_at = now;
        self.history.push(StateChangeRecord {
            deployment_id: self.id.clone(),
            seq: self.history.len() as u32,
            from,
            to,
            at: now,
        });
        info!(deployment = %self.id, %from, %to, "deployment state changed");
        Ok(())
    }

    /// `CREATED -> PROVISIONING`.
    pub fn begin_provisioning(&mut self, now: u64) -> RolloutResult<()> {
        self.transition(DeploymentState::Provisioning, now)
    }

    /// `PROVISIONING -> SHIFTING`. The first hold is measured from here.
    pub fn provisioned(&mut self, now: u64) -> RolloutResult<()> {
        self.transition(DeploymentState::Shifting, now)?;
        self.shifter.restart(now);
        Ok(())
    }

    /// Move to `FAILED`, recording why.
    pub fn fail(&mut self, reason: &str, now: u64) -> RolloutResult<()> {
        self.transition(DeploymentState::Failed, now)?;
        self.failure_reason = Some(reason.to_string());
        warn!(deployment = %self.id, reason, "deployment failed");
        Ok(())
    }

    /// Perform at most one automatic transition. Returns the new state,
    /// or `None` when nothing changed.
    pub fn advance(&mut self, now: u64) -> Option<DeploymentState> {
        let next = match self.state {
            DeploymentState::Shifting if self.shifter.is_finished() => DeploymentState::Completing,
            DeploymentState::Completing => DeploymentState::Complete,
            DeploymentState::RollingBack => DeploymentState::RolledBack,
            _ => return None,
        };
        self.transition(next, now).ok()?;
        Some(next)
    }

    /// Start a rollback: move to `ROLLING_BACK` and put all traffic on blue.
    ///
    /// The caller must push the returned split to the load balancer before
    /// calling `advance`.
    pub fn rollback(
        &mut self,
        trigger: RollbackTrigger,
        reason: &str,
        now: u64,
    ) -> RolloutResult<TrafficSplit> {
        self.transition(DeploymentState::RollingBack, now)?;
        let previous = self.shifter.restore_blue();
        self.rollback = Some(RollbackRecord {
            trigger,
            reason: reason.to_string(),
            at: now,
        });
        warn!(
            deployment = %self.id,
            ?trigger,
            reason,
            green_weight = previous.green(),
            "rolling back"
        );
        Ok(TrafficSplit::ALL_BLUE)
    }

    /// Record an applied shift step. Returns false if the step was stale.
    pub fn commit_shift(&mut self, step: usize, split: TrafficSplit, now: u64) -> bool {
        if self.state != DeploymentState::Shifting {
            return false;
        }
        let committed = self.shifter.commit(step, split, now);
        if committed {
            self.updated_at = now;
        }
        committed
    }

    pub fn set_verdicts(&mut self, verdicts: PoolVerdicts) {
        self.last_verdicts = verdicts;
    }

    pub fn mark_archived(&mut self, now: u64) {
        if !self.archived {
            self.archived = true;
            self.updated_at = now;
            info!(deployment = %self.id, "deployment archived");
        }
    }

    /// Transitions recorded since the last call.
    pub fn take_events(&mut self) -> Vec<StateChangeRecord> {
        let events = self.history[self.unseen..].to_vec();
        self.unseen = self.history.len();
        events
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    pub fn pool(&self, color: PoolColor) -> &str {
        match color {
            PoolColor::Blue => &self.blue_pool,
            PoolColor::Green => &self.green_pool,
        }
    }

    pub fn shifter(&self) -> &TrafficShifter {
        &self.shifter
    }

    pub fn split(&self) -> TrafficSplit {
        self.shifter.split()
    }

    pub fn termination_wait_secs(&self) -> u64 {
        self.termination_wait_secs
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn history(&self) -> &[StateChangeRecord] {
        &self.history
    }

    /// Snapshot for reporting and persistence.
    pub fn status(&self) -> DeploymentRecord {
        let split = self.shifter.split();
        DeploymentRecord {
            id: self.id.clone(),
            application: self.application.clone(),
            state: self.state,
            blue_pool: self.blue_pool.clone(),
            green_pool: self.green_pool.clone(),
            blue_weight: split.blue(),
            green_weight: split.green(),
            steps_applied: self.shifter.steps_applied(),
            total_steps: self.shifter.plan().len(),
            last_verdicts: self.last_verdicts,
            outcome: self.state.outcome(),
            rollback: self.rollback.clone(),
            failure_reason: self.failure_reason.clone(),
            archived: self.archived,
            termination_wait_secs: self.termination_wait_secs,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
