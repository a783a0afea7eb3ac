// Container runtime
// Decision: Shell out to the docker CLI instead of talking to the daemon API
// Decision: Containers are named after the run and phase so they can be killed by name
//
// One call to `ContainerRuntime::run` = one `docker run --rm` to completion,
// deadline or cancellation, with stdout and stderr captured as separate
// line streams.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::SandboxError;

/// Bind mount from the host into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }
}

/// Everything needed to start one container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
    pub memory_mb: u64,
    pub cpus: f64,
    pub network_disabled: bool,
    pub timeout: Duration,
    pub max_output_lines: usize,
}

/// How a container run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited,
    TimedOut,
    Cancelled,
}

/// Captured result of a container run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOutput {
    /// `None` when the process was killed or exited by signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub termination: Termination,
}

impl ContainerOutput {
    pub fn exited(exit_code: i32, stdout: Vec<String>, stderr: Vec<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout,
            stderr,
            termination: Termination::Exited,
        }
    }

    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Run `spec` to completion. Returns early with [`Termination::Cancelled`]
    /// once `cancel` fires, after the container has been killed.
    async fn run(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<ContainerOutput, SandboxError>;
}

/// [`ContainerRuntime`] backed by the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_bin: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    /// Arguments passed to the docker binary for `spec`
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let memory = format!("{}m", spec.memory_mb);
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--memory".to_string(),
            memory.clone(),
            // same as --memory: no swap on top of the cap
            "--memory-swap".to_string(),
            memory,
            "--cpus".to_string(),
            spec.cpus.to_string(),
        ];

        if spec.network_disabled {
            args.extend(["--network".to_string(), "none".to_string()]);
        }

        for mount in &spec.mounts {
            let mode = if mount.read_only { "ro" } else { "rw" };
            args.extend([
                "-v".to_string(),
                format!("{}:{}:{}", mount.host.display(), mount.container, mode),
            ]);
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    async fn kill(&self, name: &str) {
        match Command::new(&self.docker_bin)
            .args(["kill", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => debug!(container = name, "container killed"),
            Ok(status) => debug!(container = name, %status, "docker kill returned non-zero"),
            Err(e) => warn!(container = name, error = %e, "failed to invoke docker kill"),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<ContainerOutput, SandboxError> {
        let mut child = Command::new(&self.docker_bin)
            .args(Self::run_args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", self.docker_bin, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Spawn("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Spawn("stderr not captured".to_string()))?;

        let stdout_task = tokio::spawn(collect_lines(stdout, spec.max_output_lines));
        let stderr_task = tokio::spawn(collect_lines(stderr, spec.max_output_lines));

        let (exit_code, termination) = tokio::select! {
            status = child.wait() => (status?.code(), Termination::Exited),
            _ = tokio::time::sleep(spec.timeout) => {
                debug!(container = %spec.name, "deadline exceeded, killing container");
                self.kill(&spec.name).await;
                let _ = child.kill().await;
                (None, Termination::TimedOut)
            }
            _ = cancel.cancelled() => {
                debug!(container = %spec.name, "cancelled, killing container");
                self.kill(&spec.name).await;
                let _ = child.kill().await;
                (None, Termination::Cancelled)
            }
        };

        let stdout = stdout_task
            .await
            .map_err(|e| SandboxError::Spawn(format!("stdout reader: {}", e)))??;
        let stderr = stderr_task
            .await
            .map_err(|e| SandboxError::Spawn(format!("stderr reader: {}", e)))??;

        Ok(ContainerOutput {
            exit_code,
            stdout,
            stderr,
            termination,
        })
    }
}

/// Read `reader` to EOF, keeping at most `max_lines` lines.
///
/// When lines are dropped a marker line with the dropped count is appended.
pub async fn collect_lines<R>(reader: R, max_lines: usize) -> Result<Vec<String>, SandboxError>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut kept = Vec::new();
    let mut dropped = 0usize;

    while let Some(line) = lines.next_line().await? {
        if kept.len() < max_lines {
            kept.push(line);
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        kept.push(truncation_marker(dropped));
    }
    Ok(kept)
}

pub fn truncation_marker(dropped: usize) -> String {
    format!("... output truncated ({} more lines)", dropped)
}
