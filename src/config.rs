//! Service configuration.
//!
//! A JSON document in `CODE_EXEC_CONFIG` (optional) forms the base; plain
//! environment variables override individual fields on top of it.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use serde::Deserialize;
use tracing::info;

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Parent of all per-execution workspaces. Created at startup.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Deadline applied to every compile and run phase.
    #[serde(default = "default_phase_timeout_ms")]
    pub phase_timeout_ms: u64,

    /// Deadline for a toolchain availability probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long a probe answer is reused.
    #[serde(default = "default_probe_cache_seconds")]
    pub probe_cache_seconds: u64,

    /// Executions allowed to run child processes at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-stream capture limit for stdout and stderr.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            scratch_dir: default_scratch_dir(),
            phase_timeout_ms: default_phase_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_cache_seconds: default_probe_cache_seconds(),
            max_concurrent: default_max_concurrent(),
            max_output_bytes: default_max_output_bytes(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

const fn default_port() -> u16 {
    3001
}

fn default_scratch_dir() -> PathBuf {
    "temp".into()
}

const fn default_phase_timeout_ms() -> u64 {
    10_000
}

const fn default_probe_timeout_ms() -> u64 {
    5_000
}

const fn default_probe_cache_seconds() -> u64 {
    60
}

const fn default_max_concurrent() -> usize {
    8
}

const fn default_max_output_bytes() -> usize {
    1024 * 1024
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// | Env Var             | Field                 |
    /// |---------------------|-----------------------|
    /// | `CODE_EXEC_CONFIG`  | whole document (JSON) |
    /// | `HOST`              | `host`                |
    /// | `PORT`              | `port`                |
    /// | `SCRATCH_DIR`       | `scratch_dir`         |
    /// | `PHASE_TIMEOUT_MS`  | `phase_timeout_ms`    |
    /// | `PROBE_TIMEOUT_MS`  | `probe_timeout_ms`    |
    /// | `MAX_CONCURRENT`    | `max_concurrent`      |
    /// | `MAX_OUTPUT_BYTES`  | `max_output_bytes`    |
    /// | `CORS_ORIGINS`      | `cors_origins` (comma separated) |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup("CODE_EXEC_CONFIG") {
            Some(json) => Self::from_json(&json).context("Failed to parse CODE_EXEC_CONFIG")?,
            None => Self::default(),
        };

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(dir) = lookup("SCRATCH_DIR") {
            config.scratch_dir = dir.into();
        }
        if let Some(ms) = parse_var(&lookup, "PHASE_TIMEOUT_MS")? {
            config.phase_timeout_ms = ms;
        }
        if let Some(ms) = parse_var(&lookup, "PROBE_TIMEOUT_MS")? {
            config.probe_timeout_ms = ms;
        }
        if let Some(n) = parse_var(&lookup, "MAX_CONCURRENT")? {
            config.max_concurrent = n;
        }
        if let Some(n) = parse_var(&lookup, "MAX_OUTPUT_BYTES")? {
            config.max_output_bytes = n;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        anyhow::ensure!(config.max_concurrent > 0, "MAX_CONCURRENT must be at least 1");
        anyhow::ensure!(config.phase_timeout_ms > 0, "PHASE_TIMEOUT_MS must be positive");
        config.cors_allow_list()?;

        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse configuration JSON")
    }

    /// Parsed CORS origins. Empty means any origin is allowed.
    pub fn cors_allow_list(&self) -> Result<Vec<HeaderValue>> {
        self.cors_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("CORS_ORIGINS has an invalid origin: {origin:?}"))
            })
            .collect()
    }

    pub const fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub const fn probe_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.probe_cache_seconds)
    }

    /// Create the scratch directory if absent and return its absolute path.
    pub fn ensure_scratch_dir(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.scratch_dir).with_context(|| {
            format!("Failed to create scratch directory {}", self.scratch_dir.display())
        })?;
        let dir = self.scratch_dir.canonicalize().with_context(|| {
            format!("Failed to resolve scratch directory {}", self.scratch_dir.display())
        })?;
        info!(path = %dir.display(), "Scratch directory ready");
        Ok(dir)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key} has an invalid value: {raw:?}"))
        })
        .transpose()
}
