//! Strategies that decide what the materialized source file is called.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ExecError;

/// Picks the file stem (name without extension) for submitted source.
///
/// `token` is unique per execution; namers that ignore it rely on the
/// per-run workspace directory for isolation.
pub trait SourceFileNamer: Send + Sync + std::fmt::Debug {
    fn file_stem(&self, code: &str, token: &str) -> Result<String, ExecError>;
}

/// Names the file after the execution token: `code_<token>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenNamer;

impl SourceFileNamer for TokenNamer {
    fn file_stem(&self, _code: &str, token: &str) -> Result<String, ExecError> {
        Ok(format!("code_{token}"))
    }
}

static PUBLIC_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bpublic\s+(?:(?:final|abstract|strictfp)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .expect("public class pattern is valid")
});

/// Java requires the file to be named after its public class.
#[derive(Debug, Default, Clone, Copy)]
pub struct PublicClassNamer;

impl SourceFileNamer for PublicClassNamer {
    fn file_stem(&self, code: &str, _token: &str) -> Result<String, ExecError> {
        PUBLIC_CLASS
            .captures(code)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ExecError::SourceShape("Could not find a public class in your Java code".into())
            })
    }
}
