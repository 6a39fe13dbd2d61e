//! Toolchain availability checks.
//!
//! A probe runs the binary with a cheap version flag. Anything other than
//! a clean exit within the probe timeout counts as "unavailable"; probes
//! never error and never hang.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::language::Toolchain;

#[async_trait]
pub trait ToolchainProber: Send + Sync {
    async fn is_available(&self, toolchain: &Toolchain) -> bool;
}

/// Probes by spawning `<binary> <version_arg>` with all output discarded.
#[derive(Debug, Clone)]
pub struct CommandProber {
    timeout: Duration,
}

impl CommandProber {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolchainProber for CommandProber {
    #[instrument(skip(self), fields(binary = %toolchain.binary))]
    async fn is_available(&self, toolchain: &Toolchain) -> bool {
        let spawned = Command::new(&toolchain.binary)
            .arg(&toolchain.version_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                debug!(error = %e, "Toolchain probe could not spawn");
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(status = %status, "Toolchain probe finished");
                status.success()
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Toolchain probe failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = %self.timeout.as_millis(), "Toolchain probe timed out");
                false
            }
        }
    }
}

/// Remembers probe answers for a while so slow probes (the JVM) are not
/// paid on every request.
pub struct CachingProber<P> {
    inner: P,
    ttl: Duration,
    cache: Mutex<HashMap<String, (bool, Instant)>>,
}

impl<P: ToolchainProber> CachingProber<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<P: ToolchainProber> ToolchainProber for CachingProber<P> {
    async fn is_available(&self, toolchain: &Toolchain) -> bool {
        if let Some(&(available, checked_at)) = self.cache.lock().await.get(&toolchain.binary) {
            if checked_at.elapsed() < self.ttl {
                return available;
            }
        }

        let available = self.inner.is_available(toolchain).await;
        self.cache
            .lock()
            .await
            .insert(toolchain.binary.clone(), (available, Instant::now()));
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let prober = CommandProber::new(Duration::from_secs(2));
        let toolchain = Toolchain::new("definitely-not-a-real-compiler-42", "--version");
        assert!(!prober.is_available(&toolchain).await);
    }

    #[tokio::test]
    async fn shell_is_available() {
        let prober = CommandProber::new(Duration::from_secs(2));
        // `true --version` exits cleanly on any unix host
        let toolchain = Toolchain::new("true", "--version");
        assert!(prober.is_available(&toolchain).await);
    }

    #[tokio::test]
    async fn failing_exit_is_unavailable() {
        let prober = CommandProber::new(Duration::from_secs(2));
        let toolchain = Toolchain::new("false", "--version");
        assert!(!prober.is_available(&toolchain).await);
    }

    #[tokio::test]
    async fn hung_probe_is_bounded() {
        let prober = CommandProber::new(Duration::from_millis(200));
        let toolchain = Toolchain::new("sleep", "30");
        let started = Instant::now();
        assert!(!prober.is_available(&toolchain).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    struct CountingProber {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolchainProber for CountingProber {
        async fn is_available(&self, _toolchain: &Toolchain) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test]
    async fn cache_reuses_recent_answer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let prober = CachingProber::new(
            CountingProber {
                calls: Arc::clone(&calls),
            },
            Duration::from_secs(60),
        );
        let gcc = Toolchain::new("gcc", "--version");
        let javac = Toolchain::new("javac", "-version");

        assert!(prober.is_available(&gcc).await);
        assert!(prober.is_available(&gcc).await);
        assert!(prober.is_available(&javac).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_always_reprobes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let prober = CachingProber::new(
            CountingProber {
                calls: Arc::clone(&calls),
            },
            Duration::ZERO,
        );
        let gcc = Toolchain::new("gcc", "--version");
        prober.is_available(&gcc).await;
        prober.is_available(&gcc).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
