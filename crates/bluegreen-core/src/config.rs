//! bluegreen.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub health: HealthGateConfig,
    pub deployment: DeploymentDefaults,
    pub daemon: DaemonConfig,
}

/// Alarm thresholds for the health gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthGateConfig {
    /// Length of one evaluation period in seconds.
    pub window_secs: u64,
    /// Unhealthy host count that breaches the host alarm.
    pub unhealthy_host_threshold: u32,
    /// Consecutive breaching periods before the host alarm trips.
    pub unhealthy_host_periods: u32,
    /// 5xx count that breaches the error alarm.
    pub http_5xx_threshold: u32,
    /// Consecutive breaching periods before the error alarm trips.
    pub http_5xx_periods: u32,
}

impl Default for HealthGateConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            unhealthy_host_threshold: 1,
            unhealthy_host_periods: 2,
            http_5xx_threshold: 1,
            http_5xx_periods: 1,
        }
    }
}

impl HealthGateConfig {
    /// Number of periods the rolling window must retain.
    pub fn max_periods(&self) -> u32 {
        self.unhealthy_host_periods.max(self.http_5xx_periods).max(1)
    }

    /// Span of the rolling window in seconds.
    pub fn retention_secs(&self) -> u64 {
        self.window_secs.saturating_mul(u64::from(self.max_periods()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentDefaults {
    /// Shift preset used when a request does not carry its own plan.
    pub preset: String,
    /// Minutes to keep the retired pool alive after completion.
    pub termination_wait_minutes: u64,
}

impl Default for DeploymentDefaults {
    fn default() -> Self {
        Self {
            preset: "linear-10-percent-every-1-minute".to_string(),
            termination_wait_minutes: 10,
        }
    }
}

impl DeploymentDefaults {
    pub fn termination_wait_secs(&self) -> u64 {
        self.termination_wait_minutes.saturating_mul(60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    /// Seconds between control cycles.
    pub tick_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 8480,
            data_dir: PathBuf::from("/var/lib/bluegreen"),
            tick_interval_secs: 60,
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: ControllerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.health.window_secs == 0 {
            anyhow::bail!("health.window_secs must be greater than zero");
        }
        if self.health.unhealthy_host_periods == 0 || self.health.http_5xx_periods == 0 {
            anyhow::bail!("alarm evaluation periods must be at least 1");
        }
        if self.daemon.tick_interval_secs == 0 {
            anyhow::bail!("daemon.tick_interval_secs must be greater than zero");
        }
        Ok(())
    }
}
