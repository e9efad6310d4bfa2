//! Traffic shifter: turns a shift plan into weight changes over time.
//!
//! The shifter decides; it does not act. `tick` returns a `ShiftDecision`
//! and the controller pushes the proposed weights to the load balancer.
//! Only after the weight setter accepts both weights does the controller
//! call `commit`, so the recorded split never diverges from what was
//! applied.

use serde::{Deserialize, Serialize};

use bluegreen_core::{HealthStatus, PoolColor};

use crate::plan::ShiftPlan;

/// Traffic weights for a blue/green pair. Only green is stored; blue is
/// always the remainder, so the pair sums to 100 by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplit {
    green: u32,
}

impl TrafficSplit {
    pub const ALL_BLUE: Self = Self { green: 0 };
    pub const ALL_GREEN: Self = Self { green: 100 };

    /// Split with `green` percent on green, clamped to 100.
    pub fn with_green(green: u32) -> Self {
        Self {
            green: green.min(100),
        }
    }

    pub fn blue(&self) -> u32 {
        100 - self.green
    }

    pub fn green(&self) -> u32 {
        self.green
    }

    pub fn weight(&self, color: PoolColor) -> u32 {
        match color {
            PoolColor::Blue => self.blue(),
            PoolColor::Green => self.green(),
        }
    }
}

/// What the shifter wants to happen on this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShiftDecision {
    /// At least one pool is unhealthy.
    Rollback { unhealthy: Vec<PoolColor> },
    /// Apply step `step`, moving traffic to `split`.
    Apply { step: usize, split: TrafficSplit },
    /// The pending step's hold has not elapsed.
    Holding { remaining_secs: u64 },
    /// Every step has been applied.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficShifter {
    plan: ShiftPlan,
    /// Index of the next step to apply.
    next_step: usize,
    /// When the current hold started (unix seconds).
    step_started_at: u64,
    split: TrafficSplit,
}

impl TrafficShifter {
    pub fn new(plan: ShiftPlan, started_at: u64) -> Self {
        Self {
            plan,
            next_step: 0,
            step_started_at: started_at,
            split: TrafficSplit::ALL_BLUE,
        }
    }

    /// Decide what to do at `now`. Never proposes more than one step.
    pub fn tick(&self, now: u64, blue: HealthStatus, green: HealthStatus) -> ShiftDecision {
        let unhealthy: Vec<PoolColor> = [(PoolColor::Blue, blue), (PoolColor::Green, green)]
            .into_iter()
            .filter(|(_, status)| *status == HealthStatus::Unhealthy)
            .map(|(color, _)| color)
            .collect();
        if !unhealthy.is_empty() {
            return ShiftDecision::Rollback { unhealthy };
        }

        let Some(step) = self.plan.steps().get(self.next_step) else {
            return ShiftDecision::Finished;
        };

        let elapsed = now.saturating_sub(self.step_started_at);
        if elapsed < step.hold_secs {
            return ShiftDecision::Holding {
                remaining_secs: step.hold_secs - elapsed,
            };
        }

        let green = (self.split.green() as i32 + step.weight_delta).clamp(0, 100) as u32;
        ShiftDecision::Apply {
            step: self.next_step,
            split: TrafficSplit::with_green(green),
        }
    }

    /// Record that `step` was applied at `now`. Stale or out-of-order
    /// commits are ignored and return false.
    pub fn commit(&mut self, step: usize, split: TrafficSplit, now: u64) -> bool {
        if step != self.next_step || step >= self.plan.len() {
            return false;
        }
        self.split = split;
        self.next_step += 1;
        self.step_started_at = now;
        true
    }

    /// Send all traffic back to blue. Returns the split that was in place.
    pub fn restore_blue(&mut self) -> TrafficSplit {
        std::mem::replace(&mut self.split, TrafficSplit::ALL_BLUE)
    }

    /// Restart the hold timer without applying a step.
    pub fn restart(&mut self, now: u64) {
        self.step_started_at = now;
    }

    pub fn split(&self) -> TrafficSplit {
        self.split
    }

    pub fn plan(&self) -> &ShiftPlan {
        &self.plan
    }

    pub fn steps_applied(&self) -> usize {
        self.next_step
    }

    pub fn is_finished(&self) -> bool {
        self.next_step >= self.plan.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ShiftPlan, ShiftStep};

    const OK: HealthStatus = HealthStatus::Healthy;
    const BAD: HealthStatus = HealthStatus::Unhealthy;

    fn linear_shifter() -> TrafficShifter {
        TrafficShifter::new(
            ShiftPlan::from_steps(vec![ShiftStep::new(10, 60); 10]).unwrap(),
            0,
        )
    }

    fn apply(shifter: &mut TrafficShifter, now: u64) -> ShiftDecision {
        let decision = shifter.tick(now, OK, OK);
        if let ShiftDecision::Apply { step, split } = decision {
            assert!(shifter.commit(step, split, now));
        }
        decision
    }

    #[test]
    fn split_always_sums_to_100() {
        for green in [0, 1, 50, 99, 100, 250] {
            let split = TrafficSplit::with_green(green);
            assert_eq!(split.blue() + split.green(), 100);
        }
        assert_eq!(TrafficSplit::ALL_BLUE.weight(PoolColor::Blue), 100);
    }

    #[test]
    fn holds_until_step_elapses() {
        let shifter = linear_shifter();
        assert_eq!(
            shifter.tick(45, OK, OK),
            ShiftDecision::Holding { remaining_secs: 15 }
        );
        assert_eq!(
            shifter.tick(60, OK, OK),
            ShiftDecision::Apply {
                step: 0,
                split: TrafficSplit::with_green(10)
            }
        );
    }

    #[test]
    fn applies_one_step_per_tick_even_when_late() {
        let mut shifter = linear_shifter();
        // Ten minutes late: still only one step.
        apply(&mut shifter, 600);
        assert_eq!(shifter.split().green(), 10);
        assert_eq!(shifter.steps_applied(), 1);

        // The timer restarted at 600.
        assert_eq!(
            shifter.tick(630, OK, OK),
            ShiftDecision::Holding { remaining_secs: 30 }
        );
    }

    #[test]
    fn runs_to_completion() {
        let mut shifter = linear_shifter();
        for i in 1..=10 {
            apply(&mut shifter, i * 60);
            let split = shifter.split();
            assert_eq!(split.blue() + split.green(), 100);
            assert_eq!(split.green(), (i * 10) as u32);
        }
        assert!(shifter.is_finished());
        assert_eq!(shifter.tick(660, OK, OK), ShiftDecision::Finished);
    }

    #[test]
    fn unhealthy_pool_vetoes_step() {
        let shifter = linear_shifter();
        assert_eq!(
            shifter.tick(60, OK, BAD),
            ShiftDecision::Rollback {
                unhealthy: vec![PoolColor::Green]
            }
        );
        assert_eq!(
            shifter.tick(60, BAD, BAD),
            ShiftDecision::Rollback {
                unhealthy: vec![PoolColor::Blue, PoolColor::Green]
            }
        );
    }

    #[test]
    fn stale_commit_ignored() {
        let mut shifter = linear_shifter();
        assert!(!shifter.commit(3, TrafficSplit::with_green(40), 60));
        assert_eq!(shifter.split(), TrafficSplit::ALL_BLUE);
    }

    #[test]
    fn restore_blue_resets_split() {
        let mut shifter = linear_shifter();
        apply(&mut shifter, 60);
        apply(&mut shifter, 120);
        let previous = shifter.restore_blue();
        assert_eq!(previous.green(), 20);
        assert_eq!(shifter.split(), TrafficSplit::ALL_BLUE);
    }
}
