//! Failure taxonomy for a single execution.
//!
//! Every variant renders to the user-facing `error` string; nothing here
//! ever escapes the executor as a Rust error.

use std::time::Duration;

use thiserror::Error;

use crate::language::PhaseKind;

#[derive(Debug, Error)]
pub enum ExecError {
    /// Language id has no profile.
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Required compiler or interpreter is missing from the host.
    #[error("{language} toolchain is not available: `{binary}` could not be run. Please make sure it is installed and in your PATH")]
    ToolchainUnavailable { language: String, binary: String },

    /// Source lacks a structural element the toolchain needs.
    #[error("{0}")]
    SourceShape(String),

    /// Compiler diagnostics; the run phase never started.
    #[error("{0}")]
    Compile(String),

    #[error("{} timed out after {} ms", .phase.label(), .limit.as_millis())]
    Timeout { phase: PhaseKind, limit: Duration },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Failed to execute code: could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem or pipe failure on the host side.
    #[error("Failed to execute code: {0}")]
    Environment(String),
}

impl ExecError {
    pub fn environment(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Environment(format!("{context}: {err}"))
    }

    /// Short machine-friendly tag, used as a tracing field.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::ToolchainUnavailable { .. } => "toolchain_unavailable",
            Self::SourceShape(_) => "source_shape",
            Self::Compile(_) => "compile",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Spawn { .. } => "spawn",
            Self::Environment(_) => "environment",
        }
    }
}
