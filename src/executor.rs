//! Execution pipeline: language lookup, toolchain precondition, source
//! naming, workspace setup and phase sequencing.
//!
//! `Executor::execute` never fails. Every failure ends up in the `error`
//! field of the returned `ExecutionResult`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ExecError;
use crate::language::{LanguageProfile, OnFailure, ProfileTable, Program, TemplateContext};
use crate::prober::{CachingProber, CommandProber, ToolchainProber};
use crate::runner::{Invocation, PhaseOutput, PhaseRunner, ProcessRunner, ScratchSpace};

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
}

/// Response body for one execution. Both fields are always present; a
/// non-empty `error` is the only failure signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub result: String,
    pub error: String,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            result: String::new(),
            error: error.into(),
        }
    }

    fn from_output(output: PhaseOutput) -> Self {
        let error = if output.success() {
            output.stderr
        } else {
            output.diagnostic()
        };
        Self {
            result: output.stdout,
            error,
        }
    }
}

/// Drives requests through the profile table, prober and phase runner.
pub struct Executor {
    profiles: ProfileTable,
    prober: Arc<dyn ToolchainProber>,
    runner: Arc<dyn PhaseRunner>,
    scratch_root: PathBuf,
    permits: Semaphore,
    shutdown: CancellationToken,
}

impl Executor {
    /// `max_concurrent` bounds how many executions hold a workspace and
    /// child process at once; further requests wait their turn.
    pub fn new(
        profiles: ProfileTable,
        prober: Arc<dyn ToolchainProber>,
        runner: Arc<dyn PhaseRunner>,
        scratch_root: PathBuf,
        max_concurrent: usize,
    ) -> Self {
        Self {
            profiles,
            prober,
            runner,
            scratch_root,
            permits: Semaphore::new(max_concurrent.max(1)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Production wiring: built-in languages, cached command probes and
    /// host processes.
    pub fn from_config(config: &Config, scratch_root: PathBuf) -> Self {
        let prober = CachingProber::new(
            CommandProber::new(config.probe_timeout()),
            config.probe_cache_ttl(),
        );
        Self::new(
            ProfileTable::builtin(config.phase_timeout()),
            Arc::new(prober),
            Arc::new(ProcessRunner::new(config.max_output_bytes)),
            scratch_root,
            config.max_concurrent,
        )
    }

    pub const fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    /// Cancelling this token aborts every in-flight execution.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.execute_with_cancel(request, &self.shutdown.child_token())
            .await
    }

    /// Like `execute`, but also aborts (killing the child and releasing the
    /// workspace) when `cancel` fires.
    #[instrument(skip_all, fields(language = %request.language, code_len = request.code.len()))]
    pub async fn execute_with_cancel(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        match self.try_execute(request, cancel).await {
            Ok(result) => {
                debug!(failed = !result.error.is_empty(), "Execution finished");
                result
            }
            Err(e) => {
                info!(kind = e.kind(), error = %e, "Execution failed");
                ExecutionResult::failure(e.to_string())
            }
        }
    }

    async fn try_execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecError> {
        let profile = self
            .profiles
            .get(&request.language)
            .ok_or_else(|| ExecError::UnsupportedLanguage(request.language.clone()))?;

        if profile.is_echo() {
            return Ok(ExecutionResult {
                result: request.code.clone(),
                error: String::new(),
            });
        }

        if let Some(toolchain) = &profile.requires_toolchain {
            if !self.prober.is_available(toolchain).await {
                return Err(ExecError::ToolchainUnavailable {
                    language: profile.id.clone(),
                    binary: toolchain.binary.clone(),
                });
            }
        }

        let token = Uuid::new_v4().simple().to_string();
        let stem = profile.namer.file_stem(&request.code, &token)?;

        let mut programs = Vec::with_capacity(profile.phases.len());
        for phase in &profile.phases {
            programs.push(self.resolve_program(&profile, &phase.command.program).await?);
        }

        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit
                .map_err(|_| ExecError::Environment("executor is shutting down".into()))?,
            () = cancel.cancelled() => return Err(ExecError::Cancelled),
        };

        let mut scratch = ScratchSpace::create(&self.scratch_root, &token).await?;
        let outcome = self
            .run_phases(&profile, programs, &mut scratch, &stem, &request.code, cancel)
            .await;
        scratch.release().await;
        outcome
    }

    async fn run_phases(
        &self,
        profile: &LanguageProfile,
        programs: Vec<Option<String>>,
        scratch: &mut ScratchSpace,
        stem: &str,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecError> {
        let source = scratch
            .write(&profile.source_file_name(stem), code)
            .await?;
        let artifact = profile
            .artifact_file_name(stem)
            .map(|name| scratch.track(&name));
        let ctx = TemplateContext {
            workdir: scratch.path().to_path_buf(),
            source,
            artifact,
            stem: stem.to_string(),
        };

        let mut last = PhaseOutput::default();
        for (phase, program) in profile.phases.iter().zip(programs) {
            let program = match program {
                Some(program) => program,
                None => artifact_program(&ctx)?,
            };
            let invocation = Invocation {
                phase: phase.kind,
                program,
                args: phase.command.render_args(&ctx),
                workdir: ctx.workdir.clone(),
            };

            let output = self
                .runner
                .run_phase(&invocation, phase.timeout, cancel)
                .await?;

            if phase.on_failure == OnFailure::Abort && !output.success() {
                debug!(phase = ?phase.kind, "Phase failed, skipping the rest of the pipeline");
                return Err(ExecError::Compile(output.diagnostic()));
            }
            last = output;
        }

        Ok(ExecutionResult::from_output(last))
    }

    /// `None` means the phase runs the compiled artifact.
    async fn resolve_program(
        &self,
        profile: &LanguageProfile,
        program: &Program,
    ) -> Result<Option<String>, ExecError> {
        match program {
            Program::Binary(binary) => Ok(Some(binary.clone())),
            Program::Artifact => Ok(None),
            Program::FirstAvailable(candidates) => {
                for candidate in candidates {
                    if self.prober.is_available(candidate).await {
                        return Ok(Some(candidate.binary.clone()));
                    }
                }
                warn!(language = %profile.id, "No interpreter candidate is available");
                let tried = candidates
                    .iter()
                    .map(|c| c.binary.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(ExecError::ToolchainUnavailable {
                    language: profile.id.clone(),
                    binary: tried,
                })
            }
        }
    }
}

fn artifact_program(ctx: &TemplateContext) -> Result<String, ExecError> {
    ctx.artifact
        .as_ref()
        .map(|path| path.to_string_lossy().into_owned())
        .ok_or_else(|| ExecError::Environment("profile runs an artifact it never produces".into()))
}
