// Sandbox executor
// Decision: Build and run are separate containers sharing the artifacts directory
// Decision: The session signal cancels whichever container is running; nothing is sent afterwards
// Decision: Every terminal path unregisters the session and removes the workspace
//
// Pipeline for one run:
//   stage src -> {build, launched} -> build container -> classify
//     -> (succeeded) run container -> classify -> unregister -> cleanup

use std::sync::Arc;

use coderunner_core::telemetry::phase_span_name;
use coderunner_core::{Outcome, Phase, Run, RunNotification, SessionRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use super::classify::{classify_build, classify_run};
use super::config::{PhaseLimits, SandboxConfig};
use super::runtime::{ContainerOutput, ContainerRuntime, ContainerSpec, Mount, Termination};
use super::workspace::RunWorkspace;
use super::SandboxError;

/// Message sent when the sandbox itself fails (docker missing, disk full, ...)
pub const UNAVAILABLE_MESSAGE: &str = "execution environment unavailable";

/// Where a run's pipeline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Build did not succeed; the run container never started
    BuildStopped(Outcome),
    /// Run container finished (or timed out)
    Finished(Outcome),
    /// Session signal fired mid-pipeline
    Cancelled,
    /// Internal failure during the given phase
    Unavailable(Phase),
}

pub struct SandboxExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    sessions: SessionRegistry,
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sessions: SessionRegistry,
        config: SandboxConfig,
    ) -> Self {
        Self {
            runtime,
            sessions,
            config,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Build and run `run`, pushing progress to its session (if any)
    pub async fn execute(&self, run: &Run) -> ExecutionOutcome {
        let run_id = run.id;
        // No live session: still execute, just with nobody listening
        let cancel = self.sessions.signal(run_id).unwrap_or_default();

        let mut phase = Phase::Build;
        let workspace = match RunWorkspace::create(&self.config.work_dir, run_id).await {
            Ok(ws) => ws,
            Err(e) => {
                error!(%run_id, error = %e, "failed to create workspace");
                self.report_unavailable(run_id, phase).await;
                self.sessions.unregister(run_id);
                return ExecutionOutcome::Unavailable(phase);
            }
        };

        let result = self.pipeline(run, &workspace, &cancel, &mut phase).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%run_id, %phase, error = %e, "sandbox execution failed");
                self.report_unavailable(run_id, phase).await;
                ExecutionOutcome::Unavailable(phase)
            }
        };

        self.sessions.unregister(run_id);
        workspace.cleanup().await;

        info!(%run_id, outcome = ?outcome, "execution finished");
        outcome
    }

    async fn pipeline(
        &self,
        run: &Run,
        workspace: &RunWorkspace,
        cancel: &CancellationToken,
        phase: &mut Phase,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let run_id = run.id;

        workspace
            .write_source(
                &self.config.project_file_name,
                &self.config.project_file_contents,
            )
            .await?;
        workspace
            .write_source(&self.config.source_file_name, &run.code)
            .await?;

        // ============================================
        // Build
        // ============================================

        self.notify(run_id, &RunNotification::new(Phase::Build, Outcome::Launched))
            .await;

        let build_spec = self.build_spec(run_id, workspace);
        let output = self.run_phase(run_id, Phase::Build, &build_spec, cancel).await?;
        if output.termination == Termination::Cancelled {
            return Ok(ExecutionOutcome::Cancelled);
        }

        let sentinel = workspace.has_artifact(&self.config.markers.sentinel).await;
        let build = classify_build(
            &output,
            sentinel,
            &self.config.markers,
            self.config.build_limits.timeout,
        );
        debug!(%run_id, result = %build.result, sentinel, "build classified");
        self.notify(run_id, &build).await;

        if build.result != Outcome::Succeeded {
            return Ok(ExecutionOutcome::BuildStopped(build.result));
        }

        // ============================================
        // Run
        // ============================================

        *phase = Phase::Run;
        let run_spec = self.run_spec(run_id, workspace);
        let output = self.run_phase(run_id, Phase::Run, &run_spec, cancel).await?;
        if output.termination == Termination::Cancelled {
            return Ok(ExecutionOutcome::Cancelled);
        }

        let result = classify_run(&output, self.config.run_limits.timeout);
        self.notify(run_id, &result).await;

        Ok(ExecutionOutcome::Finished(result.result))
    }

    async fn run_phase(
        &self,
        run_id: Uuid,
        phase: Phase,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<ContainerOutput, SandboxError> {
        let span = info_span!(
            "sandbox_phase",
            otel.name = %phase_span_name(phase),
            %run_id,
            container = %spec.name,
            image = %spec.image,
        );

        async {
            let output = self.runtime.run(spec, cancel).await?;
            debug!(
                exit_code = ?output.exit_code,
                termination = ?output.termination,
                stdout_lines = output.stdout.len(),
                stderr_lines = output.stderr.len(),
                "container finished"
            );
            Ok::<_, SandboxError>(output)
        }
        .instrument(span)
        .await
    }

    fn container_spec(
        &self,
        name: String,
        image: &str,
        command: &[String],
        mounts: Vec<Mount>,
        limits: &PhaseLimits,
    ) -> ContainerSpec {
        ContainerSpec {
            name,
            image: image.to_string(),
            command: command.to_vec(),
            mounts,
            memory_mb: limits.memory_mb,
            cpus: limits.cpus,
            network_disabled: self.config.network_disabled,
            timeout: limits.timeout,
            max_output_lines: self.config.max_output_lines,
        }
    }

    pub fn build_spec(&self, run_id: Uuid, workspace: &RunWorkspace) -> ContainerSpec {
        self.container_spec(
            format!("coderunner-{}-build", run_id),
            &self.config.build_image,
            &self.config.build_command,
            vec![
                Mount::read_only(workspace.src_dir(), &self.config.build_src_path),
                Mount::read_write(workspace.artifacts_dir(), &self.config.build_artifacts_path),
            ],
            &self.config.build_limits,
        )
    }

    pub fn run_spec(&self, run_id: Uuid, workspace: &RunWorkspace) -> ContainerSpec {
        self.container_spec(
            format!("coderunner-{}-run", run_id),
            &self.config.run_image,
            &self.config.run_command,
            vec![Mount::read_only(
                workspace.artifacts_dir(),
                &self.config.run_app_path,
            )],
            &self.config.run_limits,
        )
    }

    async fn notify(&self, run_id: Uuid, notification: &RunNotification) {
        if !self.sessions.try_notify(run_id, notification).await {
            debug!(%run_id, action = %notification.action, result = %notification.result, "no live session for notification");
        }
    }

    async fn report_unavailable(&self, run_id: Uuid, phase: Phase) {
        let notification = RunNotification::new(phase, Outcome::Aborted)
            .with_error_lines(vec![UNAVAILABLE_MESSAGE.to_string()]);
        self.notify(run_id, &notification).await;
    }
}
