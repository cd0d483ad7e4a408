//! Update-module session
//!
//! One [`UpdateModule`] exists per install attempt. It owns the work
//! directory the module runs in and invokes the module executable once
//! per protocol state. The streaming `Download` state lives in the
//! `download` module; everything here is plain spawn-and-wait.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use ota_core::OtaConfig;

use crate::error::ModuleError;
use crate::file_tree::delete_file_tree;
use crate::state::{ModuleState, RebootAction};

/// Driver-side handle for one update-module install session.
pub struct UpdateModule {
    module_path: PathBuf,
    work_dir: PathBuf,
    timeout: Duration,
    pub(crate) module_started_download: bool,
    pub(crate) module_finished_download: bool,
    pub(crate) downloading_to_files: bool,
}

impl UpdateModule {
    /// Create a session for `module_path`, working in `work_dir`.
    pub fn new(module_path: PathBuf, work_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            module_path,
            work_dir,
            timeout,
            module_started_download: false,
            module_finished_download: false,
            downloading_to_files: false,
        }
    }

    /// Create a session for the module serving `payload_type`, with the
    /// work directory and timeout taken from the configuration.
    pub fn for_payload_type(config: &OtaConfig, payload_type: &str) -> Self {
        Self::new(
            config.modules_path().join(payload_type),
            config.modules_work_path().join(payload_type),
            Duration::from_secs(config.module_timeout_seconds),
        )
    }

    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the module opened `stream-next` during `Download`.
    pub fn started_download(&self) -> bool {
        self.module_started_download
    }

    /// Whether the download completed (streamed to the module or spooled
    /// to `files/`).
    pub fn finished_download(&self) -> bool {
        self.module_finished_download
    }

    /// Whether the payloads were spooled to `files/` instead of streamed.
    pub fn downloaded_to_files(&self) -> bool {
        self.downloading_to_files
    }

    // =========================================================================
    // Non-streaming protocol states
    // =========================================================================

    pub async fn artifact_install(&mut self) -> Result<(), ModuleError> {
        self.call_state(ModuleState::ArtifactInstall).await.map(drop)
    }

    pub async fn artifact_reboot(&mut self) -> Result<(), ModuleError> {
        self.call_state(ModuleState::ArtifactReboot).await.map(drop)
    }

    pub async fn artifact_commit(&mut self) -> Result<(), ModuleError> {
        self.call_state(ModuleState::ArtifactCommit).await.map(drop)
    }

    pub async fn artifact_rollback(&mut self) -> Result<(), ModuleError> {
        self.call_state(ModuleState::ArtifactRollback).await.map(drop)
    }

    pub async fn artifact_verify_reboot(&mut self) -> Result<(), ModuleError> {
        self.call_state(ModuleState::ArtifactVerifyReboot).await.map(drop)
    }

    pub async fn artifact_rollback_reboot(&mut self) -> Result<(), ModuleError> {
        self.call_state(ModuleState::ArtifactRollbackReboot).await.map(drop)
    }

    pub async fn artifact_verify_rollback_reboot(&mut self) -> Result<(), ModuleError> {
        self.call_state(ModuleState::ArtifactVerifyRollbackReboot)
            .await
            .map(drop)
    }

    pub async fn artifact_failure(&mut self) -> Result<(), ModuleError> {
        self.call_state(ModuleState::ArtifactFailure).await.map(drop)
    }

    /// Ask the module whether installing requires a reboot.
    pub async fn needs_reboot(&mut self) -> Result<RebootAction, ModuleError> {
        let output = self.call_state(ModuleState::NeedsReboot).await?;
        match first_token(&output) {
            "Yes" => Ok(RebootAction::Yes),
            "No" => Ok(RebootAction::No),
            "Automatic" => Ok(RebootAction::Automatic),
            other => Err(ModuleError::UnexpectedOutput(other.to_string())),
        }
    }

    /// Ask the module whether it can roll an install back.
    pub async fn supports_rollback(&mut self) -> Result<bool, ModuleError> {
        let output = self.call_state(ModuleState::SupportsRollback).await?;
        match first_token(&output) {
            "Yes" => Ok(true),
            "No" => Ok(false),
            other => Err(ModuleError::UnexpectedOutput(other.to_string())),
        }
    }

    /// Invoke the module's `Cleanup` state and remove the work directory.
    ///
    /// This is the only operation that removes the work directory; failed
    /// installs leave it in place for diagnostics until cleanup runs.
    pub async fn cleanup(&mut self) -> Result<(), ModuleError> {
        let result = self.call_state(ModuleState::Cleanup).await.map(drop);
        delete_file_tree(&self.work_dir)?;
        result
    }

    /// Run `<module> <state> <work_dir>` to completion.
    ///
    /// Stdout is captured and returned (two states parse it); stderr is
    /// forwarded to the log. The configured timeout applies; on expiry
    /// the process is killed.
    async fn call_state(&mut self, state: ModuleState) -> Result<String, ModuleError> {
        debug!(module = %self.module_path.display(), state = %state, "Invoking update module");
        let child = Command::new(&self.module_path)
            .arg(state.as_str())
            .arg(&self.work_dir)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(state = %state, "Update module timed out");
                ModuleError::TimedOut
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        for line in stdout.lines() {
            debug!(state = %state, "module: {line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!(state = %state, "module: {line}");
        }

        if output.status.success() {
            Ok(stdout)
        } else {
            Err(ModuleError::from_exit_status(output.status))
        }
    }

    /// Spawn the module for the streaming `Download` state, with stdout
    /// and stderr drained to the log in the background.
    pub(crate) fn spawn_download(&self) -> Result<Child, ModuleError> {
        let mut child = Command::new(&self.module_path)
            .arg(ModuleState::Download.as_str())
            .arg(&self.work_dir)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_to_log(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_to_log(stderr, true));
        }
        Ok(child)
    }
}

async fn drain_to_log<R>(stream: R, is_stderr: bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!("module: {line}");
        } else {
            debug!("module: {line}");
        }
    }
}

fn first_token(output: &str) -> &str {
    output.lines().next().unwrap_or("").trim()
}
