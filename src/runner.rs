//! Phase execution and scratch workspace management.
//!
//! The runner spawns one toolchain invocation, captures its output and
//! enforces the phase deadline. Workspaces own the files an execution
//! creates and remove them on every exit path.

mod process;
mod scratch;

pub use process::ProcessRunner;
pub use scratch::ScratchSpace;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::language::PhaseKind;

/// A fully rendered command, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub phase: PhaseKind,
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

/// Captured output of a phase that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl PhaseOutput {
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Toolchain diagnostics, or a synthetic description of the exit when
    /// the toolchain printed nothing to stderr.
    pub fn diagnostic(&self) -> String {
        if !self.stderr.is_empty() {
            return self.stderr.clone();
        }
        match self.exit_code {
            Some(0) => String::new(),
            Some(code) => format!("Process exited with status {code}"),
            None => "Process was terminated by a signal".to_string(),
        }
    }
}

/// Runs one phase under a deadline.
///
/// Toolchain failures (non-zero exit, stderr output) are data in the
/// returned `PhaseOutput`. Only timeouts, cancellation and host-side
/// failures are errors.
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    async fn run_phase(
        &self,
        invocation: &Invocation,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PhaseOutput, ExecError>;
}
