//! Per-execution scratch workspace.
//!
//! Each execution gets `<scratch_root>/run-<token>`. Files written or
//! expected inside it are tracked, and the whole directory is removed on
//! release. If the owning future is dropped (client disconnect, panic),
//! `Drop` performs the same cleanup synchronously.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ExecError;

#[derive(Debug)]
pub struct ScratchSpace {
    dir: PathBuf,
    tracked: Vec<PathBuf>,
    released: bool,
}

impl ScratchSpace {
    /// Create the workspace directory. Fails if it already exists.
    pub async fn create(scratch_root: &Path, token: &str) -> Result<Self, ExecError> {
        let dir = scratch_root.join(format!("run-{token}"));
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|e| ExecError::environment("creating scratch workspace", e))?;
        debug!(dir = %dir.display(), "Created scratch workspace");
        Ok(Self {
            dir,
            tracked: Vec::new(),
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write `contents` to `name` inside the workspace.
    pub async fn write(&mut self, name: &str, contents: &str) -> Result<PathBuf, ExecError> {
        let path = self.track(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| ExecError::environment("writing source file", e))?;
        Ok(path)
    }

    /// Register a file a toolchain is expected to produce.
    pub fn track(&mut self, name: &str) -> PathBuf {
        let path = self.dir.join(name);
        self.tracked.push(path.clone());
        path
    }

    /// Remove every tracked artifact and the workspace itself.
    ///
    /// Failures are logged and swallowed.
    pub async fn release(mut self) {
        self.released = true;
        for path in self.tracked.iter().rev() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                log_unlink_failure(path, &e);
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "Failed to remove scratch workspace");
        } else {
            debug!(dir = %self.dir.display(), "Released scratch workspace");
        }
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!(dir = %self.dir.display(), "Scratch workspace dropped without release, cleaning up");
        for path in self.tracked.iter().rev() {
            if let Err(e) = std::fs::remove_file(path) {
                log_unlink_failure(path, &e);
            }
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "Failed to remove scratch workspace");
        }
    }
}

// Expected artifacts are legitimately absent when a compile phase failed.
fn log_unlink_failure(path: &Path, err: &std::io::Error) {
    if err.kind() == std::io::ErrorKind::NotFound {
        debug!(path = %path.display(), "Artifact was never created");
    } else {
        warn!(path = %path.display(), error = %err, "Cleanup error");
    }
}
