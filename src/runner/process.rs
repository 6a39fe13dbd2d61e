//! Toolchain invocation on the host via `tokio::process`.
//!
//! Every phase runs as the leader of a fresh process group. Whatever the
//! submitted program spawns stays in that group and is killed with it.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{Invocation, PhaseOutput, PhaseRunner};
use crate::error::ExecError;

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// How long to keep reading after the program exited and its group was
/// killed. Only matters for descendants that left the group.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Runs phases as host child processes.
///
/// Output is piped (never inherited) and capped at `max_output_bytes` per
/// stream. The process group is killed on timeout, on cancellation, when
/// the program exits, and when the calling future is dropped.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub const fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

enum Outcome {
    Finished(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl PhaseRunner for ProcessRunner {
    #[instrument(
        skip(self, cancel),
        fields(
            phase = ?invocation.phase,
            program = %invocation.program,
            timeout_ms = %timeout.as_millis(),
        )
    )]
    async fn run_phase(
        &self,
        invocation: &Invocation,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutput, ExecError> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;
        let mut group = ProcessGroup::of(&child);

        let mut child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Environment("child stdout was not captured".into()))?;
        let mut child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Environment("child stderr was not captured".into()))?;

        let mut stdout = Capture::new(self.max_output_bytes);
        let mut stderr = Capture::new(self.max_output_bytes);
        let outcome = {
            // Borrows `child` and the captures only until the select
            // finishes, so both are usable below.
            let run = async {
                let reads = async {
                    tokio::try_join!(
                        stdout.fill(&mut child_stdout),
                        stderr.fill(&mut child_stderr),
                    )
                };
                tokio::pin!(reads);

                let (drained, exited) = tokio::select! {
                    res = &mut reads => (Some(res), None),
                    status = child.wait() => (None, Some(status?)),
                };
                let status = match exited {
                    Some(status) => status,
                    None => child.wait().await?,
                };
                match drained {
                    Some(res) => {
                        res?;
                    }
                    None => {
                        // The program is done. Anything still holding the
                        // pipes is a leftover descendant.
                        group.kill();
                        match tokio::time::timeout(DRAIN_GRACE, &mut reads).await {
                            Ok(res) => {
                                res?;
                            }
                            Err(_) => debug!("Output still open after exit, keeping what was read"),
                        }
                    }
                }
                Ok::<_, std::io::Error>(status)
            };

            tokio::select! {
                res = tokio::time::timeout(timeout, run) => match res {
                    Ok(finished) => Outcome::Finished(finished),
                    Err(_) => Outcome::TimedOut,
                },
                () = cancel.cancelled() => Outcome::Cancelled,
            }
        };

        match outcome {
            Outcome::Finished(Ok(status)) => {
                group.kill();
                let output = PhaseOutput {
                    stdout: stdout.into_text(),
                    stderr: stderr.into_text(),
                    exit_code: status.code(),
                };
                debug!(exit_code = ?output.exit_code, "Phase completed");
                Ok(output)
            }
            Outcome::Finished(Err(e)) => {
                terminate(&mut group, &mut child).await;
                Err(ExecError::environment("reading process output", e))
            }
            Outcome::TimedOut => {
                warn!("Phase exceeded its deadline, killing process group");
                terminate(&mut group, &mut child).await;
                Err(ExecError::Timeout {
                    phase: invocation.phase,
                    limit: timeout,
                })
            }
            Outcome::Cancelled => {
                debug!("Phase cancelled, killing process group");
                terminate(&mut group, &mut child).await;
                Err(ExecError::Cancelled)
            }
        }
    }
}

async fn terminate(group: &mut ProcessGroup, child: &mut Child) {
    group.kill();
    // Reaps the leader. Fails only if it was already reaped.
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Child process already gone");
    }
}

/// Kills the whole process group of a spawned child, at the latest on drop.
#[derive(Debug)]
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    /// The child was spawned with `process_group(0)`, so its pid is the
    /// group id.
    fn of(child: &Child) -> Self {
        let pgid = child
            .id()
            .and_then(|id| i32::try_from(id).ok())
            .map(Pid::from_raw);
        Self { pgid }
    }

    /// Send SIGKILL to every member. Disarms after the first call so a
    /// recycled group id is never signalled.
    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!(pgid = pgid.as_raw(), "Killed process group"),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "Failed to kill process group"),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Bounded capture of one output stream.
///
/// Bytes are committed chunk by chunk, so a fill that is abandoned midway
/// keeps everything read so far.
#[derive(Debug)]
struct Capture {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Capture {
    const fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Read until EOF, keeping up to `limit` bytes and draining the rest so
    /// the child never blocks on a full pipe.
    async fn fill<R>(&mut self, reader: &mut R) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 8192];
        loop {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            let room = self.limit.saturating_sub(self.bytes.len());
            if n > room {
                self.truncated = true;
            }
            self.bytes.extend_from_slice(&chunk[..n.min(room)]);
        }
    }

    fn into_text(mut self) -> String {
        if self.truncated {
            // Don't leave half a character in front of the marker.
            if let Err(e) = std::str::from_utf8(&self.bytes) {
                if e.error_len().is_none() {
                    self.bytes.truncate(e.valid_up_to());
                }
            }
        }
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}
