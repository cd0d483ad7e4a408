//! otad - OTA update client daemon
//!
//! Polls the deployment server for new deployments, drives installs
//! through update modules and reports status back.
//!
//! Usage:
//!   otad [OPTIONS] <COMMAND>
//!
//! Commands:
//!   daemon                     Poll the server on an interval
//!   check-update               One-shot deployment check
//!   install <artifact-dir>     Install a parsed artifact directory
//!   report <id> <status>       Push a deployment status
//!   show-provides              Print device type and provides

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ota_client::{deployment_artifact_name, deployment_id, DeploymentStatus, DeploymentsClient};
use ota_core::{DeviceContext, OtaConfig};
use ota_module::UpdateModule;
use otad::{artifact_dir, updater};

enum Command {
    Daemon,
    CheckUpdate,
    Install {
        artifact_path: PathBuf,
        deployment_id: Option<String>,
    },
    Report {
        deployment_id: String,
        status: DeploymentStatus,
    },
    ShowProvides,
}

struct Args {
    command: Command,
    /// Config file (TOML)
    config_path: Option<PathBuf>,
    /// Override for data_store_dir, mainly for development setups
    data_store_dir: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path = None;
    let mut data_store_dir = None;
    let mut positional: Vec<String> = Vec::new();
    let mut install_deployment_id = None;

    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                if i + 1 >= argv.len() {
                    bail!("Missing argument for --config");
                }
                config_path = Some(PathBuf::from(&argv[i + 1]));
                i += 2;
            }
            "--data-dir" | "-d" => {
                if i + 1 >= argv.len() {
                    bail!("Missing argument for --data-dir");
                }
                data_store_dir = Some(PathBuf::from(&argv[i + 1]));
                i += 2;
            }
            "--deployment-id" => {
                if i + 1 >= argv.len() {
                    bail!("Missing argument for --deployment-id");
                }
                install_deployment_id = Some(argv[i + 1].clone());
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => bail!("Unknown option: {arg}"),
            _ => {
                positional.push(argv[i].clone());
                i += 1;
            }
        }
    }

    let command = match positional.first().map(String::as_str) {
        None | Some("daemon") => Command::Daemon,
        Some("check-update") => Command::CheckUpdate,
        Some("install") => {
            let path = positional
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("install requires an artifact directory"))?;
            Command::Install {
                artifact_path: PathBuf::from(path),
                deployment_id: install_deployment_id,
            }
        }
        Some("report") => {
            let id = positional
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("report requires a deployment id"))?;
            let status = positional
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("report requires a status"))?;
            Command::Report {
                deployment_id: id.clone(),
                status: status
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))?,
            }
        }
        Some("show-provides") => Command::ShowProvides,
        Some(other) => bail!("Unknown command: {other}"),
    };

    Ok(Args {
        command,
        config_path,
        data_store_dir,
    })
}

fn print_help() {
    eprintln!(
        r#"otad - OTA update client daemon

Usage: otad [OPTIONS] <COMMAND>

Commands:
  daemon                      Poll the deployment server on an interval (default)
  check-update                Check once for a pending deployment and print it
  install <artifact-dir>      Install a parsed artifact directory
  report <id> <status>        Push a deployment status to the server
  show-provides               Print the device type and current provides

Options:
  -c, --config <path>         Configuration file (TOML)
  -d, --data-dir <path>       Override data_store_dir from the config
      --deployment-id <id>    Deployment to report against (install command)
  -h, --help                  Print this help message
"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otad=info,ota_client=info,ota_module=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    let mut config = match &args.config_path {
        Some(path) => OtaConfig::from_file(path)
            .with_context(|| format!("Loading config from {}", path.display()))?,
        None => OtaConfig::default(),
    };
    if let Some(dir) = args.data_store_dir {
        config.data_store_dir = dir;
    }

    let client = DeploymentsClient::new(&config.server_url)?;
    let mut ctx = DeviceContext::initialize(config).context("Opening device state store")?;

    match args.command {
        Command::Daemon => run_daemon(&ctx, &client).await,
        Command::CheckUpdate => {
            match client.check_new_deployments(&ctx).await? {
                Some(deployment) => println!("{}", serde_json::to_string_pretty(&deployment)?),
                None => println!("No deployment pending"),
            }
            Ok(())
        }
        Command::Install {
            artifact_path,
            deployment_id,
        } => {
            let mut artifact = artifact_dir::load(&artifact_path)?;
            let payload_type = artifact.header().payload_type.clone();
            let mut module = UpdateModule::for_payload_type(ctx.config(), &payload_type);
            if !module.module_path().exists() {
                bail!("No update module installed for payload type {payload_type:?}");
            }
            updater::run_deployment(
                &mut ctx,
                &client,
                &mut module,
                &mut artifact,
                deployment_id.as_deref(),
            )
            .await
        }
        Command::Report {
            deployment_id,
            status,
        } => {
            client.push_status(&deployment_id, status, None).await?;
            info!(deployment_id, status = %status, "Status pushed");
            Ok(())
        }
        Command::ShowProvides => {
            println!("device_type={}", ctx.get_device_type()?);
            for (key, value) in ctx.load_provides()? {
                println!("{key}={value}");
            }
            Ok(())
        }
    }
}

async fn run_daemon(ctx: &DeviceContext, client: &DeploymentsClient) -> Result<()> {
    let interval = Duration::from_secs(ctx.config().update_poll_interval_seconds);
    info!(
        server = %ctx.config().server_url,
        interval_secs = interval.as_secs(),
        "Starting otad (OTA update client daemon)"
    );

    loop {
        if let Err(e) = poll_once(ctx, client).await {
            warn!(error = %e, "Deployment check failed");
        }
        tokio::time::sleep(interval).await;
    }
}

/// One poll cycle: ask for a deployment and report the short-circuit
/// cases. Artifact fetching and unpacking happens out of process; a
/// deployment carrying new software is only announced here.
async fn poll_once(ctx: &DeviceContext, client: &DeploymentsClient) -> Result<()> {
    let Some(deployment) = client.check_new_deployments(ctx).await? else {
        debug!("No deployment pending");
        return Ok(());
    };

    let id = deployment_id(&deployment).unwrap_or_default().to_string();
    let offered = deployment_artifact_name(&deployment)
        .unwrap_or_default()
        .to_string();
    let installed = ctx
        .load_provides()?
        .get("artifact_name")
        .cloned()
        .unwrap_or_default();

    if !offered.is_empty() && offered == installed {
        info!(deployment_id = %id, artifact = %offered, "Deployment artifact is already installed");
        if !id.is_empty() {
            client
                .push_status(&id, DeploymentStatus::AlreadyInstalled, None)
                .await?;
        }
    } else {
        info!(
            deployment_id = %id,
            artifact = %offered,
            "New deployment available; waiting for the artifact dispatcher to unpack it"
        );
    }
    Ok(())
}
