//! Deployment orchestration
//!
//! Drives one already-parsed artifact through the update-module state
//! sequence, reporting status transitions to the server along the way.
//! The caller owns retry policy and artifact acquisition; this module
//! owns the ordering of phases and the failure handling.

use anyhow::{Context as _, Result};
use tracing::{error, info, warn};

use ota_client::{DeploymentStatus, DeploymentsClient};
use ota_core::{Artifact, DeviceContext};
use ota_module::{prepare_file_tree, RebootAction, UpdateModule};

/// Run a full deployment: download, install, optional reboot, commit.
///
/// `deployment_id` is `None` for standalone installs, in which case no
/// status is reported. On failure the module is given a chance to roll
/// back (including the rollback-reboot verification when a reboot had
/// already been performed), `ArtifactFailure` runs, the work directory
/// is cleaned up and a `failure` status with the error as substate is
/// pushed.
pub async fn run_deployment(
    ctx: &mut DeviceContext,
    client: &DeploymentsClient,
    module: &mut UpdateModule,
    artifact: &mut Artifact,
    deployment_id: Option<&str>,
) -> Result<()> {
    info!(
        artifact = %artifact.header().artifact_name,
        module = %module.module_path().display(),
        "Starting deployment"
    );

    let mut rebooted: Option<RebootAction> = None;
    match install(ctx, client, module, artifact, deployment_id, &mut rebooted).await {
        Ok(()) => {
            push_status(client, deployment_id, DeploymentStatus::Success, None).await;
            info!("Deployment succeeded");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "Deployment failed");
            handle_failure(module, rebooted).await;
            if let Err(e) = module.cleanup().await {
                warn!(error = %e, "Cleanup after failed deployment failed");
            }
            push_status(
                client,
                deployment_id,
                DeploymentStatus::Failure,
                Some(&err.to_string()),
            )
            .await;
            Err(err)
        }
    }
}

/// `rebooted` records the reboot action once a reboot has been
/// performed, so the failure path knows to verify the rollback reboot.
async fn install(
    ctx: &mut DeviceContext,
    client: &DeploymentsClient,
    module: &mut UpdateModule,
    artifact: &mut Artifact,
    deployment_id: Option<&str>,
    rebooted: &mut Option<RebootAction>,
) -> Result<()> {
    push_status(client, deployment_id, DeploymentStatus::Downloading, None).await;
    prepare_file_tree(module.work_dir(), ctx, artifact.header())
        .context("Preparing module file tree")?;
    module.download(artifact).await.context("Download state")?;

    push_status(client, deployment_id, DeploymentStatus::Installing, None).await;
    module.artifact_install().await.context("ArtifactInstall state")?;

    match module.needs_reboot().await.context("NeedsReboot query")? {
        RebootAction::No => {}
        action => {
            push_status(client, deployment_id, DeploymentStatus::Rebooting, None).await;
            *rebooted = Some(action);
            if action == RebootAction::Yes {
                module.artifact_reboot().await.context("ArtifactReboot state")?;
            }
            module
                .artifact_verify_reboot()
                .await
                .context("ArtifactVerifyReboot state")?;
        }
    }

    module.artifact_commit().await.context("ArtifactCommit state")?;

    let header = artifact.header();
    ctx.commit_artifact_data(
        &header.artifact_name,
        &header.artifact_group,
        header.provides.as_ref(),
        header.clears_provides.as_deref(),
        |_| Ok(()),
    )
    .context("Committing artifact data")?;

    module.cleanup().await.context("Cleanup state")?;
    Ok(())
}

/// Best-effort failure handling: roll back if the module can, then let it
/// observe the failure. When a reboot had been performed before the
/// failure, the rollback gets its own reboot sequence, mirroring the
/// forward path. Errors here are logged, never propagated; the original
/// failure is what the caller reports.
async fn handle_failure(module: &mut UpdateModule, rebooted: Option<RebootAction>) {
    match module.supports_rollback().await {
        Ok(true) => {
            info!("Update module supports rollback; rolling back");
            match module.artifact_rollback().await {
                Ok(()) => {
                    if let Some(action) = rebooted {
                        if action == RebootAction::Yes {
                            if let Err(e) = module.artifact_rollback_reboot().await {
                                warn!(error = %e, "ArtifactRollbackReboot failed");
                            }
                        }
                        if let Err(e) = module.artifact_verify_rollback_reboot().await {
                            warn!(error = %e, "ArtifactVerifyRollbackReboot failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "ArtifactRollback failed"),
            }
        }
        Ok(false) => {}
        Err(e) => warn!(error = %e, "SupportsRollback query failed"),
    }
    if let Err(e) = module.artifact_failure().await {
        warn!(error = %e, "ArtifactFailure failed");
    }
}

async fn push_status(
    client: &DeploymentsClient,
    deployment_id: Option<&str>,
    status: DeploymentStatus,
    substate: Option<&str>,
) {
    let Some(id) = deployment_id else {
        return;
    };
    if let Err(e) = client.push_status(id, status, substate).await {
        warn!(deployment_id = id, status = %status, error = %e, "Failed to push deployment status");
    }
}
