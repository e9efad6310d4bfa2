//! In-process simulated infrastructure driver.
//!
//! Stands in for a load balancer and a container scheduler: weights and
//! instances live in memory and every call is logged. Useful for running
//! the daemon end to end without cloud credentials.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::info;

use bluegreen_core::{DriverError, InstanceHandle, PoolId, PoolSpec, Provisioner, WeightSetter};

#[derive(Debug, Default)]
pub struct LocalDriver {
    weights: Mutex<HashMap<PoolId, u32>>,
    running: Mutex<Vec<InstanceHandle>>,
    next_task: AtomicU64,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WeightSetter for LocalDriver {
    fn set_weights(
        &self,
        prod_pool: &PoolId,
        prod_weight: u32,
        test_pool: &PoolId,
        test_weight: u32,
    ) -> Result<(), DriverError> {
        if prod_weight + test_weight != 100 {
            return Err(DriverError::Weights(format!(
                "weights must sum to 100, got {prod_weight}+{test_weight}"
            )));
        }
        let mut weights = self.weights.lock().unwrap_or_else(PoisonError::into_inner);
        weights.insert(prod_pool.clone(), prod_weight);
        weights.insert(test_pool.clone(), test_weight);
        info!(
            prod = %prod_pool,
            prod_weight,
            test = %test_pool,
            test_weight,
            "listener weights updated"
        );
        Ok(())
    }
}

impl Provisioner for LocalDriver {
    fn provision(&self, spec: &PoolSpec) -> Result<Vec<InstanceHandle>, DriverError> {
        if spec.desired_count == 0 {
            return Err(DriverError::Provision(format!(
                "{} requested with zero instances",
                spec.revision
            )));
        }
        let handles: Vec<InstanceHandle> = (0..spec.desired_count)
            .map(|_| {
                let n = self.next_task.fetch_add(1, Ordering::Relaxed);
                format!("local://{}/task-{n:08}", spec.revision)
            })
            .collect();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles.iter().cloned());
        info!(revision = %spec.revision, count = handles.len(), "instances started");
        Ok(handles)
    }

    fn terminate_instances(&self, handles: &[InstanceHandle]) -> Result<(), DriverError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.retain(|h| !handles.contains(h));
        info!(count = handles.len(), still_running = running.len(), "instances stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl LocalDriver {
        fn weight(&self, pool: &str) -> Option<u32> {
            self.weights.lock().unwrap().get(pool).copied()
        }

        fn running(&self) -> usize {
            self.running.lock().unwrap().len()
        }
    }

    fn spec(count: u32) -> PoolSpec {
        PoolSpec {
            revision: "web:7".to_string(),
            desired_count: count,
        }
    }

    #[test]
    fn provision_and_terminate() {
        let driver = LocalDriver::new();
        let handles = driver.provision(&spec(3)).unwrap();
        assert_eq!(handles.len(), 3);
        assert_eq!(driver.running(), 3);

        driver.terminate_instances(&handles[..2]).unwrap();
        assert_eq!(driver.running(), 1);
    }

    #[test]
    fn zero_instances_rejected() {
        let driver = LocalDriver::new();
        assert!(matches!(
            driver.provision(&spec(0)),
            Err(DriverError::Provision(_))
        ));
    }

    #[test]
    fn weights_must_sum_to_100() {
        let driver = LocalDriver::new();
        driver
            .set_weights(&"blue".to_string(), 70, &"green".to_string(), 30)
            .unwrap();
        assert_eq!(driver.weight("green"), Some(30));
        assert!(
            driver
                .set_weights(&"blue".to_string(), 70, &"green".to_string(), 40)
                .is_err()
        );
        assert_eq!(driver.weight("blue"), Some(70));
    }
}
