//! Periodic control loop: ticks every live deployment.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use bluegreen_core::epoch_secs;
use bluegreen_rollout::DeploymentController;

pub async fn run(
    controller: Arc<DeploymentController>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "control loop started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let ticked = controller.tick_all(epoch_secs());
                debug!(deployments = ticked.len(), "control cycle finished");
            }
            _ = shutdown.changed() => {
                info!("control loop shutting down");
                break;
            }
        }
    }
}
