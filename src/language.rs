//! Static per-language execution policy.
//!
//! A profile says how source is materialized (extension and file namer),
//! which toolchain must be present, and the ordered phases to run. A
//! profile with no phases echoes its source back untouched.

mod namer;

pub use namer::{PublicClassNamer, SourceFileNamer, TokenNamer};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Which step of a pipeline a phase is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Compile,
    Run,
}

impl PhaseKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Compile => "Compilation",
            Self::Run => "Execution",
        }
    }
}

/// What the pipeline does when a phase exits unsuccessfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Stop here and report the phase's diagnostics as a compile error.
    Abort,
    /// Hand stdout/stderr back to the caller as data.
    ContinueCapturingStderr,
}

/// A host binary plus the cheap argument used to check it exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub binary: String,
    pub version_arg: String,
}

impl Toolchain {
    pub fn new(binary: impl Into<String>, version_arg: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            version_arg: version_arg.into(),
        }
    }
}

/// The program a phase invokes.
#[derive(Debug, Clone)]
pub enum Program {
    Binary(String),
    /// First candidate the prober reports available.
    FirstAvailable(Vec<Toolchain>),
    /// The executable produced by an earlier phase.
    Artifact,
}

/// Paths known for one execution, substituted into argument templates.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub workdir: PathBuf,
    pub source: PathBuf,
    pub artifact: Option<PathBuf>,
    pub stem: String,
}

#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub program: Program,
    /// Arguments; `{source}`, `{artifact}`, `{workdir}` and `{stem}` are
    /// replaced per execution.
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: Program, args: &[&str]) -> Self {
        Self {
            program,
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    pub fn render_args(&self, ctx: &TemplateContext) -> Vec<String> {
        let artifact = ctx.artifact.as_deref().map(path_str).unwrap_or_default();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{source}", &path_str(&ctx.source))
                    .replace("{artifact}", &artifact)
                    .replace("{workdir}", &path_str(&ctx.workdir))
                    .replace("{stem}", &ctx.stem)
            })
            .collect()
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Clone)]
pub struct Phase {
    pub kind: PhaseKind,
    pub command: CommandTemplate,
    pub timeout: Duration,
    pub on_failure: OnFailure,
}

impl Phase {
    pub fn compile(command: CommandTemplate, timeout: Duration) -> Self {
        Self {
            kind: PhaseKind::Compile,
            command,
            timeout,
            on_failure: OnFailure::Abort,
        }
    }

    pub fn run(command: CommandTemplate, timeout: Duration) -> Self {
        Self {
            kind: PhaseKind::Run,
            command,
            timeout,
            on_failure: OnFailure::ContinueCapturingStderr,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LanguageProfile {
    /// Canonical language id, as reported by `/languages`.
    pub id: String,
    pub aliases: Vec<String>,
    pub file_extension: String,
    pub namer: Arc<dyn SourceFileNamer>,
    /// Suffix of the compiled output, relative to the source stem.
    pub artifact_suffix: Option<String>,
    pub phases: Vec<Phase>,
    /// Probed before anything touches the filesystem.
    pub requires_toolchain: Option<Toolchain>,
}

impl LanguageProfile {
    /// Languages rendered directly by the caller; source is echoed back.
    pub fn echo(id: &str) -> Self {
        Self {
            id: id.to_string(),
            aliases: Vec::new(),
            file_extension: String::new(),
            namer: Arc::new(TokenNamer),
            artifact_suffix: None,
            phases: Vec::new(),
            requires_toolchain: None,
        }
    }

    pub fn interpreted(id: &str, extension: &str, program: Program, timeout: Duration) -> Self {
        Self {
            id: id.to_string(),
            aliases: Vec::new(),
            file_extension: extension.to_string(),
            namer: Arc::new(TokenNamer),
            artifact_suffix: None,
            phases: vec![Phase::run(
                CommandTemplate::new(program, &["{source}"]),
                timeout,
            )],
            requires_toolchain: None,
        }
    }

    #[must_use]
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| (*a).to_string()).collect();
        self
    }

    pub fn is_echo(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn source_file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.file_extension)
    }

    pub fn artifact_file_name(&self, stem: &str) -> Option<String> {
        self.artifact_suffix
            .as_ref()
            .map(|suffix| format!("{stem}{suffix}"))
    }
}

fn javascript(timeout: Duration) -> LanguageProfile {
    LanguageProfile::interpreted("javascript", "js", Program::Binary("node".into()), timeout)
        .with_aliases(&["js", "node"])
}

fn python(timeout: Duration) -> LanguageProfile {
    let candidates = ["python3", "python", "py"]
        .into_iter()
        .map(|bin| Toolchain::new(bin, "--version"))
        .collect();
    LanguageProfile::interpreted("python", "py", Program::FirstAvailable(candidates), timeout)
        .with_aliases(&["py", "python3"])
}

fn java(timeout: Duration) -> LanguageProfile {
    LanguageProfile {
        id: "java".into(),
        aliases: Vec::new(),
        file_extension: "java".into(),
        namer: Arc::new(PublicClassNamer),
        artifact_suffix: Some(".class".into()),
        phases: vec![
            Phase::compile(
                CommandTemplate::new(
                    Program::Binary("javac".into()),
                    &["-encoding", "UTF-8", "{source}"],
                ),
                timeout,
            ),
            Phase::run(
                CommandTemplate::new(
                    Program::Binary("java".into()),
                    &["-Dfile.encoding=UTF-8", "-cp", "{workdir}", "{stem}"],
                ),
                timeout,
            ),
        ],
        requires_toolchain: Some(Toolchain::new("javac", "-version")),
    }
}

/// C-family compile-to-executable pipeline.
fn native(
    id: &str,
    extension: &str,
    compiler: &str,
    std_flag: &str,
    timeout: Duration,
) -> LanguageProfile {
    LanguageProfile {
        id: id.to_string(),
        aliases: Vec::new(),
        file_extension: extension.to_string(),
        namer: Arc::new(TokenNamer),
        artifact_suffix: Some(std::env::consts::EXE_SUFFIX.to_string()),
        phases: vec![
            Phase::compile(
                CommandTemplate::new(
                    Program::Binary(compiler.to_string()),
                    &[std_flag, "-O2", "-pipe", "-o", "{artifact}", "{source}"],
                ),
                timeout,
            ),
            Phase::run(CommandTemplate::new(Program::Artifact, &[]), timeout),
        ],
        requires_toolchain: Some(Toolchain::new(compiler, "--version")),
    }
}

/// Immutable lookup table from language id (or alias) to profile.
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    profiles: Vec<Arc<LanguageProfile>>,
    index: HashMap<String, usize>,
}

impl ProfileTable {
    /// The languages the editor ships with, each phase bounded by `phase_timeout`.
    pub fn builtin(phase_timeout: Duration) -> Self {
        Self::from_profiles([
            javascript(phase_timeout),
            python(phase_timeout),
            java(phase_timeout),
            native("cpp", "cpp", "g++", "-std=c++17", phase_timeout).with_aliases(&["c++", "cxx"]),
            native("c", "c", "gcc", "-std=c11", phase_timeout),
            LanguageProfile::echo("html"),
        ])
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = LanguageProfile>) -> Self {
        let mut table = Self::default();
        for profile in profiles {
            let slot = table.profiles.len();
            table.index.insert(normalize(&profile.id), slot);
            for alias in &profile.aliases {
                table.index.entry(normalize(alias)).or_insert(slot);
            }
            table.profiles.push(Arc::new(profile));
        }
        table
    }

    pub fn get(&self, language: &str) -> Option<Arc<LanguageProfile>> {
        self.index
            .get(&normalize(language))
            .map(|&slot| Arc::clone(&self.profiles[slot]))
    }

    /// Canonical ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.id.as_str()).collect()
    }
}

fn normalize(language: &str) -> String {
    language.trim().to_ascii_lowercase()
}
