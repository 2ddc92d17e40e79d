//! # iotdash CLI
//!
//! Command-line OTA dashboard. Lists devices, checks them for newer firmware
//! and rolls updates out while following their progress.
//!
//! ## Usage
//! ```bash
//! iotdash --api-url https://api.example.com devices
//! iotdash update 42
//! iotdash --dev update 1
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info};

use iotdash_common::{init_logging_with_format, LogFormat};
use iotdash_ota::{
    CheckResult, DeviceRegistry, FirmwareUpload, HttpBackend, MockBackend, OtaBackend,
    OtaDashboard, RolloutState,
};

mod cli;
mod config;
mod render;

use cli::{Args, Command};
use config::Config;

/// How often the watch loop redraws progress.
const WATCH_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging_with_format(&args.log_level, LogFormat::from_json_flag(args.log_json))?;

    let config = load_config(&args)?;
    let dashboard = Arc::new(build_dashboard(&args, &config)?);

    let result = run_command(&dashboard, args.command).await;
    dashboard.shutdown();
    result
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(config_path) => Config::load(config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path))?,
        None => match Config::default_path().map(Config::load) {
            Some(Ok(cfg)) => cfg,
            _ => {
                debug!("No config file found, using CLI arguments and defaults");
                Config::default()
            }
        },
    };
    Ok(config.with_cli_overrides(args))
}

fn build_dashboard(args: &Args, config: &Config) -> Result<OtaDashboard> {
    let (backend, registry): (Arc<dyn OtaBackend>, Arc<dyn DeviceRegistry>) = if args.dev {
        info!("Development mode: using in-memory demo backend");
        let mock = Arc::new(MockBackend::demo());
        (mock.clone(), mock)
    } else {
        let http = Arc::new(HttpBackend::new(&config.backend).context("Invalid backend configuration")?);
        info!(base_url = %config.backend.base_url, "Using dashboard backend");
        (http.clone(), http)
    };

    Ok(OtaDashboard::new(backend, registry))
}

async fn run_command(dashboard: &Arc<OtaDashboard>, command: Command) -> Result<()> {
    match command {
        Command::Devices => {
            dashboard.reload_devices().await.context("Failed to load devices")?;
            let views = dashboard.views();
            if views.is_empty() {
                println!("No devices.");
            } else {
                println!("{}", render::device_table(&views));
            }
            Ok(())
        }

        Command::Check { device_id } => {
            dashboard.reload_devices().await.context("Failed to load devices")?;
            let result = dashboard.check(&device_id).await?;
            if let Some(view) = dashboard.view(&device_id) {
                println!("{}", render::device_summary(&view));
            }
            if let CheckResult::CheckFailed { message } = result {
                bail!("Update check failed: {}", message);
            }
            Ok(())
        }

        Command::Update {
            device_id,
            no_watch,
            timeout_secs,
        } => {
            dashboard.reload_devices().await.context("Failed to load devices")?;
            dashboard
                .trigger(&device_id)
                .await
                .with_context(|| format!("Failed to start update on device {}", device_id))?;

            if no_watch {
                let state = dashboard.view(&device_id).map(|v| v.rollout).unwrap_or_default();
                println!("Update requested: {}", render::rollout_label(&state));
                return fail_if_failed(&state);
            }

            let refresher = {
                let dashboard = dashboard.clone();
                tokio::spawn(async move { dashboard.run_refresh_loop().await })
            };

            let outcome = tokio::select! {
                outcome = watch_rollout(dashboard, &device_id) => outcome,
                _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                    Err(anyhow::anyhow!("Gave up waiting for device {} after {}s", device_id, timeout_secs))
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    Err(anyhow::anyhow!("Interrupted; the device keeps updating in the background"))
                }
            };

            refresher.abort();
            outcome
        }

        Command::Upload {
            file,
            version,
            changelog,
            target,
        } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read firmware file: {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .context("Firmware path has no file name")?;

            let outcome = dashboard
                .upload_firmware(FirmwareUpload {
                    filename,
                    change_log: changelog,
                    version,
                    target: target.into(),
                    content,
                })
                .await
                .context("Firmware upload failed")?;

            let message = outcome.message.unwrap_or_default();
            if !outcome.success {
                bail!("Backend refused firmware: {}", message);
            }
            println!("Firmware uploaded. {}", message);
            Ok(())
        }
    }
}

/// Print rollout progress until the device is back to idle after the
/// update, or the attempt fails.
async fn watch_rollout(dashboard: &OtaDashboard, device_id: &str) -> Result<()> {
    let mut last_label = String::new();
    let mut started = false;

    loop {
        let view = dashboard
            .view(device_id)
            .with_context(|| format!("Device {} disappeared", device_id))?;

        let label = render::rollout_label(&view.rollout);
        if label != last_label {
            println!("{}", label);
            last_label = label;
        }

        match &view.rollout {
            RolloutState::Failed { .. } => return fail_if_failed(&view.rollout),
            RolloutState::Idle if started => {
                println!("{}", render::device_summary(&view));
                return Ok(());
            }
            RolloutState::Idle => {}
            _ => started = true,
        }

        tokio::time::sleep(WATCH_INTERVAL).await;
    }
}

fn fail_if_failed(state: &RolloutState) -> Result<()> {
    match state {
        RolloutState::Failed { errors } => bail!("Update failed: {}", errors.join("; ")),
        _ => Ok(()),
    }
}
