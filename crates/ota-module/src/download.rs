//! Streaming download protocol
//!
//! `Download` is the one state where the driver and the module process
//! run concurrently. Payload bytes are handed to the module through
//! named pipes inside the work directory:
//!
//! ```text
//! <work>/stream-next             announcements, one line per payload
//! <work>/streams/<payload>       payload bytes, one pipe at a time
//! <work>/files/<payload>         on-disk fallback spool
//! ```
//!
//! For every payload the driver opens `stream-next`, writes
//! `streams/<name>\n` and closes it again (the module reads each
//! announcement to EOF), then serves the payload bytes through the
//! payload pipe. After the last payload an empty line signals the end.
//! A module that exits successfully without ever opening `stream-next`
//! gets the payloads spooled to `files/` instead.
//!
//! Every blocking pipe open is raced against the child exiting, so a
//! module that dies at any point in the handshake is detected instead of
//! wedging the driver. One wall-clock timeout covers the whole state.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::Duration;

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tracing::{debug, info, warn};

use ota_core::{Artifact, Payload};

use crate::error::ModuleError;
use crate::session::UpdateModule;

const STREAM_NEXT: &str = "stream-next";
const STREAMS_DIR: &str = "streams";
const FILES_DIR: &str = "files";

/// Outcome of waiting for the module to open a pipe.
enum OpenOutcome {
    /// The module opened its end; ours is ready for writing.
    Writer(std::fs::File),
    /// The module exited before opening the pipe.
    Exited(std::process::ExitStatus),
}

impl UpdateModule {
    /// Run the `Download` state, streaming every payload of `artifact`
    /// to the module in artifact order.
    ///
    /// On success the module has either consumed the streams or, if it
    /// exited without touching `stream-next`, received the payloads under
    /// `files/`. On failure the work directory is left intact;
    /// [`cleanup`](Self::cleanup) removes it.
    pub async fn download(&mut self, artifact: &mut Artifact) -> Result<(), ModuleError> {
        self.prepare_download_dir()?;
        let mut child = self.spawn_download()?;

        let timeout = self.timeout();
        let result = match tokio::time::timeout(timeout, self.run_download(&mut child, artifact)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("Update module timed out during Download");
                Err(ModuleError::TimedOut)
            }
        };

        if result.is_err() {
            // First fatal error wins; anything that goes wrong while
            // tearing the process down is not reported.
            kill_and_reap(&mut child).await;
            self.unblock_pending_opens();
        }
        result
    }

    fn prepare_download_dir(&self) -> Result<(), ModuleError> {
        let work = self.work_dir();
        std::fs::create_dir_all(work)?;
        std::fs::create_dir_all(work.join(STREAMS_DIR))?;
        std::fs::create_dir_all(work.join(FILES_DIR))?;

        let stream_next = work.join(STREAM_NEXT);
        remove_if_exists(&stream_next)?;
        make_fifo(&stream_next)?;
        Ok(())
    }

    async fn run_download(
        &mut self,
        child: &mut Child,
        artifact: &mut Artifact,
    ) -> Result<(), ModuleError> {
        let stream_next = self.work_dir().join(STREAM_NEXT);

        while let Some(mut payload) = artifact.next_payload() {
            let stream_rel = format!("{STREAMS_DIR}/{}", payload.name());
            let stream_path = self.work_dir().join(&stream_rel);
            remove_if_exists(&stream_path)?;
            make_fifo(&stream_path)?;

            // Announce the payload on stream-next.
            let writer = match open_fifo_for_write(&stream_next, child).await? {
                OpenOutcome::Writer(writer) => writer,
                OpenOutcome::Exited(status) => {
                    if !self.module_started_download && status.success() {
                        // The module never looked at stream-next and
                        // reported success: it wants plain files.
                        info!("Update module did not read streams; storing payloads as files");
                        self.downloading_to_files = true;
                        self.store_payload_to_file(payload).await?;
                        while let Some(next) = artifact.next_payload() {
                            self.store_payload_to_file(next).await?;
                        }
                        self.module_finished_download = true;
                        return Ok(());
                    } else if status.success() {
                        // It had started the handshake and then walked
                        // away from it.
                        return Err(ModuleError::BrokenPipe);
                    }
                    return Err(ModuleError::from_exit_status(status));
                }
            };
            self.module_started_download = true;
            write_announcement(writer, &format!("{stream_rel}\n"), child).await?;

            // Serve the payload bytes.
            let writer = match open_fifo_for_write(&stream_path, child).await? {
                OpenOutcome::Writer(writer) => writer,
                OpenOutcome::Exited(status) => {
                    return Err(if status.success() {
                        ModuleError::BrokenPipe
                    } else {
                        ModuleError::from_exit_status(status)
                    });
                }
            };
            let mut writer = tokio::fs::File::from_std(writer);
            match tokio::io::copy(payload.reader(), &mut writer).await {
                Ok(written) => {
                    debug!(payload = payload.name(), bytes = written, "Streamed payload")
                }
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    return Err(broken_pipe_or_exit(child).await);
                }
                Err(e) => return Err(e.into()),
            }
            writer.flush().await?;
            // Close synchronously so the module sees EOF before the next
            // announcement.
            drop(writer.into_std().await);
            remove_if_exists(&stream_path)?;
        }

        // End of payloads: an empty line on stream-next.
        match open_fifo_for_write(&stream_next, child).await? {
            OpenOutcome::Writer(writer) => {
                write_announcement(writer, "\n", child).await?;
            }
            OpenOutcome::Exited(status) => {
                return Err(if status.success() {
                    ModuleError::BrokenPipe
                } else {
                    ModuleError::from_exit_status(status)
                });
            }
        }
        self.module_finished_download = true;

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(ModuleError::from_exit_status(status))
        }
    }

    async fn store_payload_to_file(&self, mut payload: Payload) -> Result<(), ModuleError> {
        let dest = self.work_dir().join(FILES_DIR).join(payload.name());
        let mut file = tokio::fs::File::create(&dest).await?;
        let written = tokio::io::copy(payload.reader(), &mut file).await?;
        file.flush().await?;
        debug!(payload = payload.name(), bytes = written, "Spooled payload to file");
        Ok(())
    }

    /// Release driver threads still blocked opening a pipe no process
    /// will ever read. Called after the module has been killed.
    fn unblock_pending_opens(&self) {
        connect_reader(&self.work_dir().join(STREAM_NEXT));
        if let Ok(entries) = std::fs::read_dir(self.work_dir().join(STREAMS_DIR)) {
            for entry in entries.flatten() {
                connect_reader(&entry.path());
            }
        }
    }
}

/// Open `path` (a FIFO) for writing.
///
/// The open blocks until the module opens the read side; that rendezvous
/// is the module's observable protocol step. The open is raced against
/// the child exiting so an early death cannot wedge the driver.
async fn open_fifo_for_write(path: &Path, child: &mut Child) -> Result<OpenOutcome, ModuleError> {
    let open_path = path.to_path_buf();
    let mut open_task = tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new().write(true).open(open_path)
    });

    tokio::select! {
        // A completed open must win over a simultaneous exit: a module
        // that opened the pipe and then died has still started the
        // handshake, and the write path reports what went wrong.
        biased;
        opened = &mut open_task => {
            let file = opened.map_err(std::io::Error::other)??;
            Ok(OpenOutcome::Writer(file))
        }
        status = child.wait() => {
            let status = status?;
            // Briefly connect a reader so the blocked opener thread can
            // finish, then discard whatever it opened.
            connect_reader(path);
            let _ = (&mut open_task).await;
            Ok(OpenOutcome::Exited(status))
        }
    }
}

/// Write one announcement line and close the pipe (the module reads each
/// announcement to EOF).
async fn write_announcement(
    mut writer: std::fs::File,
    line: &str,
    child: &mut Child,
) -> Result<(), ModuleError> {
    match writer.write_all(line.as_bytes()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(broken_pipe_or_exit(child).await),
        Err(e) => Err(e.into()),
    }
}

/// The module closed a pipe on us. If it exited non-zero that is the
/// more useful error; otherwise report the protocol violation.
async fn broken_pipe_or_exit(child: &mut Child) -> ModuleError {
    match tokio::time::timeout(Duration::from_millis(500), child.wait()).await {
        Ok(Ok(status)) if !status.success() => ModuleError::from_exit_status(status),
        _ => ModuleError::BrokenPipe,
    }
}

async fn kill_and_reap(child: &mut Child) {
    child.start_kill().ok();
    child.wait().await.ok();
}

fn make_fifo(path: &Path) -> Result<(), ModuleError> {
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o600))
        .map_err(|errno| ModuleError::Io(std::io::Error::from_raw_os_error(errno as i32)))
}

fn remove_if_exists(path: &Path) -> Result<(), ModuleError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Open a FIFO read end without blocking, purely to unblock a pending
/// writer-side open, and close it again.
fn connect_reader(path: &Path) {
    let _ = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path);
}
