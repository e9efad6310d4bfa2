//! Alarm definitions for target pools.
//!
//! Every pool gets an unhealthy-host alarm and a 5xx alarm. Names follow
//! `{app}{color}{kind}Alarm`, e.g. `webgreenUnhealthyHostAlarm`.

use serde::{Deserialize, Serialize};

use bluegreen_core::config::HealthGateConfig;
use bluegreen_core::{HealthSample, PoolColor};

/// Which load balancer metric an alarm watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmMetric {
    /// Average unhealthy hosts over the period.
    UnhealthyHostCount,
    /// Sum of target 5xx responses over the period.
    Http5xxCount,
}

impl AlarmMetric {
    pub fn metric_name(&self) -> &'static str {
        match self {
            AlarmMetric::UnhealthyHostCount => "UnHealthyHostCount",
            AlarmMetric::Http5xxCount => "HTTPCode_Target_5XX_Count",
        }
    }

    pub fn statistic(&self) -> &'static str {
        match self {
            AlarmMetric::UnhealthyHostCount => "Average",
            AlarmMetric::Http5xxCount => "Sum",
        }
    }

    /// Short error type used in alarm names.
    pub fn error_type(&self) -> &'static str {
        match self {
            AlarmMetric::UnhealthyHostCount => "UnhealthyHost",
            AlarmMetric::Http5xxCount => "5xx",
        }
    }

    /// Read this metric's datapoint out of a sample.
    pub fn value(&self, sample: &HealthSample) -> u32 {
        match self {
            AlarmMetric::UnhealthyHostCount => sample.unhealthy_hosts,
            AlarmMetric::Http5xxCount => sample.http_5xx,
        }
    }
}

/// A threshold alarm over one pool's samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub name: String,
    pub description: String,
    pub metric: AlarmMetric,
    pub color: PoolColor,
    /// A datapoint at or above this value breaches.
    pub threshold: u32,
    /// Consecutive breaching datapoints needed to alarm.
    pub evaluation_periods: u32,
    pub period_secs: u64,
}

impl AlarmDefinition {
    pub fn new(
        application: &str,
        color: PoolColor,
        metric: AlarmMetric,
        config: &HealthGateConfig,
    ) -> Self {
        let (threshold, evaluation_periods) = match metric {
            AlarmMetric::UnhealthyHostCount => {
                (config.unhealthy_host_threshold, config.unhealthy_host_periods)
            }
            AlarmMetric::Http5xxCount => (config.http_5xx_threshold, config.http_5xx_periods),
        };
        let error_type = metric.error_type();
        Self {
            name: format!("{application}{color}{error_type}Alarm"),
            description: format!("Alarm for the {error_type} errors of {color} target group"),
            metric,
            color,
            threshold,
            evaluation_periods: evaluation_periods.max(1),
            period_secs: config.window_secs,
        }
    }

    pub fn breaches(&self, sample: &HealthSample) -> bool {
        self.metric.value(sample) >= self.threshold
    }

    /// True if `samples` (oldest first) contain a run of at least
    /// `evaluation_periods` breaching datapoints.
    pub fn is_alarming<'a>(&self, samples: impl IntoIterator<Item = &'a HealthSample>) -> bool {
        let mut run = 0u32;
        for sample in samples {
            if self.breaches(sample) {
                run += 1;
                if run >= self.evaluation_periods {
                    return true;
                }
            } else {
                run = 0;
            }
        }
        false
    }
}

/// The two alarms watching one pool.
pub fn pool_alarms(
    application: &str,
    color: PoolColor,
    config: &HealthGateConfig,
) -> [AlarmDefinition; 2] {
    [
        AlarmDefinition::new(application, color, AlarmMetric::UnhealthyHostCount, config),
        AlarmDefinition::new(application, color, AlarmMetric::Http5xxCount, config),
    ]
}

/// All four alarms for an application's blue/green pair.
pub fn application_alarms(application: &str, config: &HealthGateConfig) -> Vec<AlarmDefinition> {
    [PoolColor::Blue, PoolColor::Green]
        .into_iter()
        .flat_map(|color| pool_alarms(application, color, config))
        .collect()
}
