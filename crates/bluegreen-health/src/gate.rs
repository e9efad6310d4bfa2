//! Health gate: per-pool rolling windows and sticky verdicts.
//!
//! `ingest` may be called from the metrics push path while the control
//! loop is calling `verdict`; both take the gate's mutex for a bounded
//! amount of work and never call out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use bluegreen_core::config::HealthGateConfig;
use bluegreen_core::{HealthSample, HealthStatus, PoolColor, PoolId};

use crate::alarms::{AlarmDefinition, pool_alarms};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("pool is not watched by this gate: {0}")]
    UnknownPool(String),
}

/// Rolling window and alarm state for one pool.
#[derive(Debug)]
struct PoolWindow {
    alarms: [AlarmDefinition; 2],
    /// Samples ordered by timestamp, oldest first.
    samples: VecDeque<HealthSample>,
    /// Names of alarms that have fired. Never cleared.
    tripped: Vec<String>,
}

impl PoolWindow {
    fn new(alarms: [AlarmDefinition; 2]) -> Self {
        Self {
            alarms,
            samples: VecDeque::new(),
            tripped: Vec::new(),
        }
    }

    /// Insert a sample, evict anything outside the retention span, and
    /// latch any alarm that is now firing. Returns newly tripped alarms.
    fn ingest(&mut self, sample: HealthSample, retention_secs: u64) -> Vec<String> {
        let idx = self
            .samples
            .partition_point(|s| s.timestamp <= sample.timestamp);
        self.samples.insert(idx, sample);

        if let Some(newest) = self.samples.back().map(|s| s.timestamp) {
            while self
                .samples
                .front()
                .is_some_and(|s| newest - s.timestamp >= retention_secs)
            {
                self.samples.pop_front();
            }
        }

        let mut newly_tripped = Vec::new();
        for alarm in &self.alarms {
            if alarm.is_alarming(&self.samples) && !self.tripped.contains(&alarm.name) {
                self.tripped.push(alarm.name.clone());
                newly_tripped.push(alarm.name.clone());
            }
        }
        newly_tripped
    }

    fn status(&self) -> HealthStatus {
        let firing = self.alarms.iter().any(|a| a.is_alarming(&self.samples));
        if firing || !self.tripped.is_empty() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Health gate for one deployment.
#[derive(Debug)]
pub struct HealthGate {
    application: String,
    config: HealthGateConfig,
    pools: Mutex<HashMap<PoolId, PoolWindow>>,
}

impl HealthGate {
    pub fn new(application: &str, config: HealthGateConfig) -> Self {
        Self {
            application: application.to_string(),
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn pools(&self) -> MutexGuard<'_, HashMap<PoolId, PoolWindow>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching a pool. Re-watching an existing pool keeps its window.
    pub fn watch(&self, pool_id: &str, color: PoolColor) {
        let alarms = pool_alarms(&self.application, color, &self.config);
        self.pools()
            .entry(pool_id.to_string())
            .or_insert_with(|| PoolWindow::new(alarms));
    }

    pub fn is_watching(&self, pool_id: &str) -> bool {
        self.pools().contains_key(pool_id)
    }

    /// Append a sample to its pool's window and return the pool's status.
    pub fn ingest(&self, sample: HealthSample) -> Result<HealthStatus, HealthError> {
        let retention = self.config.retention_secs();
        let mut pools = self.pools();
        let pool_id = sample.pool_id.clone();
        let window = pools
            .get_mut(&pool_id)
            .ok_or_else(|| HealthError::UnknownPool(pool_id.clone()))?;

        debug!(
            pool = %pool_id,
            timestamp = sample.timestamp,
            unhealthy_hosts = sample.unhealthy_hosts,
            http_5xx = sample.http_5xx,
            "health sample ingested"
        );

        for alarm in window.ingest(sample, retention) {
            warn!(application = %self.application, pool = %pool_id, %alarm, "alarm tripped");
        }
        Ok(window.status())
    }

    /// Current verdict for a pool. Unknown pools have no evidence against
    /// them and are reported healthy.
    pub fn verdict(&self, pool_id: &str) -> HealthStatus {
        self.pools()
            .get(pool_id)
            .map(PoolWindow::status)
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Names of the alarms that have fired for a pool.
    pub fn tripped_alarms(&self, pool_id: &str) -> Vec<String> {
        self.pools()
            .get(pool_id)
            .map(|w| w.tripped.clone())
            .unwrap_or_default()
    }

    /// Number of samples currently retained for a pool.
    pub fn retained(&self, pool_id: &str) -> usize {
        self.pools().get(pool_id).map_or(0, |w| w.samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const BLUE: &str = "web-000001-blue";
    const GREEN: &str = "web-000001-green";

    fn gate() -> HealthGate {
        let gate = HealthGate::new("web", HealthGateConfig::default());
        gate.watch(BLUE, PoolColor::Blue);
        gate.watch(GREEN, PoolColor::Green);
        gate
    }

    fn sample(pool: &str, ts: u64, hosts: u32, errors: u32) -> HealthSample {
        HealthSample {
            pool_id: pool.to_string(),
            timestamp: ts,
            unhealthy_hosts: hosts,
            http_5xx: errors,
            window_secs: 300,
        }
    }

    #[test]
    fn no_samples_is_healthy() {
        let gate = gate();
        assert_eq!(gate.verdict(GREEN), HealthStatus::Healthy);
        assert_eq!(gate.verdict("never-watched"), HealthStatus::Healthy);
    }

    #[test]
    fn single_unhealthy_host_sample_does_not_trip() {
        let gate = gate();
        let status = gate.ingest(sample(GREEN, 300, 2, 0)).unwrap();
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn two_consecutive_unhealthy_host_samples_trip() {
        let gate = gate();
        gate.ingest(sample(GREEN, 300, 1, 0)).unwrap();
        let status = gate.ingest(sample(GREEN, 600, 1, 0)).unwrap();
        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(gate.tripped_alarms(GREEN), vec!["webgreenUnhealthyHostAlarm"]);
        assert_eq!(gate.verdict(BLUE), HealthStatus::Healthy);
    }

    #[test]
    fn one_5xx_sample_trips() {
        let gate = gate();
        let status = gate.ingest(sample(BLUE, 300, 0, 1)).unwrap();
        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(gate.tripped_alarms(BLUE), vec!["webblue5xxAlarm"]);
    }

    #[test]
    fn verdict_is_sticky_after_window_clears() {
        let gate = gate();
        gate.ingest(sample(GREEN, 300, 0, 5)).unwrap();
        assert_eq!(gate.verdict(GREEN), HealthStatus::Unhealthy);

        // Healthy samples push the breach out of the window.
        for ts in [600, 900, 1200, 1500] {
            gate.ingest(sample(GREEN, ts, 0, 0)).unwrap();
        }
        assert_eq!(gate.retained(GREEN), 2);
        assert_eq!(gate.verdict(GREEN), HealthStatus::Unhealthy);
        assert_eq!(gate.verdict(GREEN), HealthStatus::Unhealthy);
    }

    #[test]
    fn window_evicts_beyond_retention() {
        let gate = gate();
        for ts in [0, 300, 600, 900] {
            gate.ingest(sample(BLUE, ts, 0, 0)).unwrap();
        }
        // Retention is max(2, 1) * 300s: only the two newest stay.
        assert_eq!(gate.retained(BLUE), 2);
    }

    #[test]
    fn out_of_order_samples_are_sorted() {
        let gate = gate();
        gate.ingest(sample(GREEN, 600, 1, 0)).unwrap();
        gate.ingest(sample(GREEN, 900, 0, 0)).unwrap();
        // Late sample lands between them, breaking no run; then a sample
        // older than the window is dropped on arrival.
        gate.ingest(sample(GREEN, 100, 1, 0)).unwrap();
        assert_eq!(gate.retained(GREEN), 2);
        assert_eq!(gate.verdict(GREEN), HealthStatus::Healthy);
    }

    #[test]
    fn unknown_pool_is_rejected() {
        let gate = gate();
        assert!(gate.is_watching(GREEN));
        assert!(!gate.is_watching("other"));
        let err = gate.ingest(sample("other", 300, 0, 0)).unwrap_err();
        assert_eq!(err, HealthError::UnknownPool("other".to_string()));
    }

    #[test]
    fn concurrent_ingest_and_verdict() {
        let gate = Arc::new(gate());
        let writer = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                for i in 0..100u64 {
                    gate.ingest(sample(BLUE, i * 300, 0, 0)).unwrap();
                }
            })
        };
        for _ in 0..100 {
            assert_eq!(gate.verdict(BLUE), HealthStatus::Healthy);
        }
        writer.join().unwrap();
        assert_eq!(gate.retained(BLUE), 2);
    }
}
