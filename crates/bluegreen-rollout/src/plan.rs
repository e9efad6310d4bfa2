//! Shift plans: how traffic moves from blue to green.
//!
//! A plan is an ordered list of `ShiftStep`s. Each step waits `hold_secs`
//! after the previous one was applied, then adds `weight_delta` percent to
//! green. Cumulative green weight must never decrease, never exceed 100,
//! and must end at exactly 100.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a plan was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("step {index} lowers green weight by {delta}%")]
    Decreasing { index: usize, delta: i32 },

    #[error("step {index} takes green weight to {cumulative}%, above 100%")]
    Overshoot { index: usize, cumulative: i64 },

    #[error("plan ends with green at {final_weight}%, not 100%")]
    Incomplete { final_weight: i32 },

    #[error("linear increment must be between 1 and 100, got {0}")]
    BadIncrement(u32),

    #[error("unknown preset: {0}")]
    UnknownPreset(String),
}

/// One step of a shift plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftStep {
    /// Percentage points moved to green by this step.
    pub weight_delta: i32,
    /// Seconds to wait after the previous step before applying this one.
    pub hold_secs: u64,
}

impl ShiftStep {
    pub fn new(weight_delta: i32, hold_secs: u64) -> Self {
        Self {
            weight_delta,
            hold_secs,
        }
    }
}

/// A validated shift plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ShiftStep>", into = "Vec<ShiftStep>")]
pub struct ShiftPlan {
    steps: Vec<ShiftStep>,
}

impl ShiftPlan {
    /// Build a plan from weight deltas.
    pub fn from_steps(steps: Vec<ShiftStep>) -> Result<Self, PlanError> {
        validate(&steps)?;
        Ok(Self { steps })
    }

    /// Build a plan from cumulative green targets: `(target%, hold_secs)`.
    pub fn from_targets(targets: &[(u32, u64)]) -> Result<Self, PlanError> {
        let mut previous = 0i32;
        let mut steps = Vec::with_capacity(targets.len());
        for (index, &(target, hold_secs)) in targets.iter().enumerate() {
            if target > 100 {
                return Err(PlanError::Overshoot {
                    index,
                    cumulative: i64::from(target),
                });
            }
            let target = target as i32;
            steps.push(ShiftStep::new(target - previous, hold_secs));
            previous = target;
        }
        Self::from_steps(steps)
    }

    /// Move `percent` every `interval_secs`, starting immediately. The
    /// last step is shortened so the plan ends at exactly 100.
    pub fn linear(percent: u32, interval_secs: u64) -> Result<Self, PlanError> {
        if percent == 0 || percent > 100 {
            return Err(PlanError::BadIncrement(percent));
        }
        let mut steps = Vec::new();
        let mut cumulative = 0u32;
        while cumulative < 100 {
            let delta = percent.min(100 - cumulative);
            let hold = if steps.is_empty() { 0 } else { interval_secs };
            steps.push(ShiftStep::new(delta as i32, hold));
            cumulative += delta;
        }
        Self::from_steps(steps)
    }

    /// Move `percent` immediately, then the remainder after `bake_secs`.
    pub fn canary(percent: u32, bake_secs: u64) -> Result<Self, PlanError> {
        if percent == 0 || percent > 100 {
            return Err(PlanError::BadIncrement(percent));
        }
        let mut steps = vec![ShiftStep::new(percent as i32, 0)];
        if percent < 100 {
            steps.push(ShiftStep::new(100 - percent as i32, bake_secs));
        }
        Self::from_steps(steps)
    }

    /// Everything at once on the first tick.
    pub fn all_at_once() -> Self {
        Self {
            steps: vec![ShiftStep::new(100, 0)],
        }
    }

    pub fn steps(&self) -> &[ShiftStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Cumulative green weight after each step.
    pub fn cumulative(&self) -> Vec<u32> {
        self.steps
            .iter()
            .scan(0i32, |acc, step| {
                *acc += step.weight_delta;
                Some(*acc as u32)
            })
            .collect()
    }
}

impl TryFrom<Vec<ShiftStep>> for ShiftPlan {
    type Error = PlanError;

    fn try_from(steps: Vec<ShiftStep>) -> Result<Self, Self::Error> {
        Self::from_steps(steps)
    }
}

impl From<ShiftPlan> for Vec<ShiftStep> {
    fn from(plan: ShiftPlan) -> Self {
        plan.steps
    }
}

fn validate(steps: &[ShiftStep]) -> Result<(), PlanError> {
    if steps.is_empty() {
        return Err(PlanError::Empty);
    }
    let mut cumulative = 0i32;
    for (index, step) in steps.iter().enumerate() {
        if step.weight_delta < 0 {
            return Err(PlanError::Decreasing {
                index,
                delta: step.weight_delta.saturating_neg(),
            });
        }
        // Both terms are in 0..=i32::MAX, so the sum fits in i64.
        let next = i64::from(cumulative) + i64::from(step.weight_delta);
        if next > 100 {
            return Err(PlanError::Overshoot {
                index,
                cumulative: next,
            });
        }
        cumulative = next as i32;
    }
    if cumulative != 100 {
        return Err(PlanError::Incomplete {
            final_weight: cumulative,
        });
    }
    Ok(())
}

/// Named shift configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentPreset {
    #[serde(rename = "linear-10-percent-every-1-minute")]
    Linear10PercentEvery1Minute,
    #[serde(rename = "linear-10-percent-every-3-minutes")]
    Linear10PercentEvery3Minutes,
    #[serde(rename = "canary-10-percent-5-minutes")]
    Canary10Percent5Minutes,
    #[serde(rename = "canary-10-percent-15-minutes")]
    Canary10Percent15Minutes,
    AllAtOnce,
}

impl DeploymentPreset {
    pub const ALL: [DeploymentPreset; 5] = [
        DeploymentPreset::Linear10PercentEvery1Minute,
        DeploymentPreset::Linear10PercentEvery3Minutes,
        DeploymentPreset::Canary10Percent5Minutes,
        DeploymentPreset::Canary10Percent15Minutes,
        DeploymentPreset::AllAtOnce,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeploymentPreset::Linear10PercentEvery1Minute => "linear-10-percent-every-1-minute",
            DeploymentPreset::Linear10PercentEvery3Minutes => "linear-10-percent-every-3-minutes",
            DeploymentPreset::Canary10Percent5Minutes => "canary-10-percent-5-minutes",
            DeploymentPreset::Canary10Percent15Minutes => "canary-10-percent-15-minutes",
            DeploymentPreset::AllAtOnce => "all-at-once",
        }
    }

    pub fn plan(&self) -> ShiftPlan {
        let plan = match self {
            DeploymentPreset::Linear10PercentEvery1Minute => ShiftPlan::linear(10, 60),
            DeploymentPreset::Linear10PercentEvery3Minutes => ShiftPlan::linear(10, 180),
            DeploymentPreset::Canary10Percent5Minutes => ShiftPlan::canary(10, 300),
            DeploymentPreset::Canary10Percent15Minutes => ShiftPlan::canary(10, 900),
            DeploymentPreset::AllAtOnce => return ShiftPlan::all_at_once(),
        };
        // Preset parameters are constants inside the valid range.
        plan.unwrap_or_else(|_| ShiftPlan::all_at_once())
    }
}

impl FromStr for DeploymentPreset {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeploymentPreset::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| PlanError::UnknownPreset(s.to_string()))
    }
}

/// How a create request describes its plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanRequest {
    Preset { name: String },
    Steps { steps: Vec<ShiftStep> },
    Targets { targets: Vec<(u32, u64)> },
    Linear { percent: u32, interval_secs: u64 },
    Canary { percent: u32, bake_secs: u64 },
}

impl PlanRequest {
    pub fn into_plan(self) -> Result<ShiftPlan, PlanError> {
        match self {
            PlanRequest::Preset { name } => Ok(name.parse::<DeploymentPreset>()?.plan()),
            PlanRequest::Steps { steps } => ShiftPlan::from_steps(steps),
            PlanRequest::Targets { targets } => ShiftPlan::from_targets(&targets),
            PlanRequest::Linear {
                percent,
                interval_secs,
            } => ShiftPlan::linear(percent, interval_secs),
            PlanRequest::Canary { percent, bake_secs } => ShiftPlan::canary(percent, bake_secs),
        }
    }
}

impl From<ShiftPlan> for PlanRequest {
    fn from(plan: ShiftPlan) -> Self {
        PlanRequest::Steps { steps: plan.steps }
    }
}

impl From<DeploymentPreset> for PlanRequest {
    fn from(preset: DeploymentPreset) -> Self {
        PlanRequest::Preset {
            name: preset.name().to_string(),
        }
    }
}
