//! bluegreend: the blue/green deployment daemon.
//!
//! Single binary that assembles the controller:
//! - State store (redb)
//! - Deployment controller with a simulated local driver
//! - Periodic control loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! bluegreend serve --config /etc/bluegreen/bluegreen.toml --port 8480
//! bluegreend alarms --app web
//! ```

mod control_loop;
mod driver;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bluegreen_core::ControllerConfig;
use bluegreen_health::application_alarms;
use bluegreen_rollout::{DeploymentController, DeploymentPreset};
use bluegreen_state::StateStore;

use crate::driver::LocalDriver;

#[derive(Parser)]
#[command(name = "bluegreend", about = "Blue/green deployment controller daemon")]
struct Cli {
    /// Path to bluegreen.toml. Defaults apply when the file is absent.
    #[arg(long, global = true, default_value = "bluegreen.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop and API server.
    Serve {
        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seconds between control cycles.
        #[arg(long)]
        tick_interval: Option<u64>,
    },
    /// Print the alarm definitions for an application.
    Alarms {
        #[arg(long)]
        app: String,
        /// Print the definitions as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the built-in shift presets.
    Presets,
    /// Print the effective configuration as TOML.
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bluegreend=debug,bluegreen=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            tick_interval,
        } => {
            if let Some(port) = port {
                config.daemon.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.daemon.data_dir = data_dir;
            }
            if let Some(secs) = tick_interval {
                config.daemon.tick_interval_secs = secs;
            }
            run_serve(config).await
        }
        Command::Alarms { app, json } => {
            let alarms = application_alarms(&app, &config.health);
            if json {
                println!("{}", serde_json::to_string_pretty(&alarms)?);
                return Ok(());
            }
            for alarm in &alarms {
                println!(
                    "{:<32} {} ({}) >= {} for {} x {}s",
                    alarm.name,
                    alarm.metric.metric_name(),
                    alarm.metric.statistic(),
                    alarm.threshold,
                    alarm.evaluation_periods,
                    alarm.period_secs,
                );
            }
            Ok(())
        }
        Command::Presets => {
            for preset in DeploymentPreset::ALL {
                let targets: Vec<String> = preset
                    .plan()
                    .steps()
                    .iter()
                    .zip(preset.plan().cumulative())
                    .map(|(step, total)| format!("{total}%@+{}s", step.hold_secs))
                    .collect();
                println!("{:<36} {}", preset.name(), targets.join(" "));
            }
            Ok(())
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<ControllerConfig> {
    if path.exists() {
        let config = ControllerConfig::from_file(path)?;
        check_preset(&config)?;
        info!(path = ?path, "configuration loaded");
        Ok(config)
    } else {
        info!(path = ?path, "no configuration file, using defaults");
        Ok(ControllerConfig::default())
    }
}

/// The default preset must name a built-in plan, or every create request
/// without a plan would be rejected.
fn check_preset(config: &ControllerConfig) -> anyhow::Result<()> {
    config
        .deployment
        .preset
        .parse::<DeploymentPreset>()
        .map_err(|e| anyhow::anyhow!("deployment.preset: {e}"))?;
    Ok(())
}

async fn run_serve(config: ControllerConfig) -> anyhow::Result<()> {
    info!("blue/green controller starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.daemon.data_dir)?;
    let db_path = config.daemon.data_dir.join("bluegreen.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let driver = Arc::new(LocalDriver::new());
    let controller =
        Arc::new(DeploymentController::new(&config, driver.clone(), driver).with_store(store)?);
    info!(
        preset = %config.deployment.preset,
        termination_wait_minutes = config.deployment.termination_wait_minutes,
        "deployment controller initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let loop_handle = tokio::spawn(control_loop::run(
        controller.clone(),
        Duration::from_secs(config.daemon.tick_interval_secs),
        shutdown_rx,
    ));

    // ── Start API server ───────────────────────────────────────

    let router = bluegreen_api::build_router(controller);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.daemon.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = loop_handle.await;

    info!("blue/green controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_in_config_is_checked() {
        let config = ControllerConfig::from_toml("[deployment]\npreset = \"all-at-once\"\n").unwrap();
        assert!(check_preset(&config).is_ok());

        let config =
            ControllerConfig::from_toml("[deployment]\npreset = \"linear-10-percent-every-1-minutes\"\n")
                .unwrap();
        let err = check_preset(&config).unwrap_err();
        assert!(err.to_string().contains("unknown preset"));
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/bluegreen.toml")).unwrap();
        assert_eq!(config.deployment.preset, "linear-10-percent-every-1-minute");
        assert!(check_preset(&config).is_ok());
    }
}
