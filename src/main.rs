//! code-exec-daemon
//!
//! HTTP service that runs editor-submitted code with the host's local
//! toolchains. Configuration comes from the environment; flags override it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_exec_daemon::{config::Config, executor::Executor, server};

#[derive(Parser, Debug)]
#[command(name = "code-exec-daemon")]
#[command(about = "Compile and run editor-submitted code with local toolchains")]
struct Args {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Scratch directory for execution workspaces (overrides SCRATCH_DIR)
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.scratch_dir {
        config.scratch_dir = dir;
    }

    let scratch_root = config.ensure_scratch_dir()?;

    let executor = Executor::from_config(&config, scratch_root);
    info!(
        languages = ?executor.profiles().ids(),
        phase_timeout_ms = config.phase_timeout_ms,
        max_concurrent = config.max_concurrent,
        "Loaded configuration"
    );

    server::serve(Arc::new(executor), &config).await
}
