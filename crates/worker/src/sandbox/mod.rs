// Sandboxed build/run of submitted code
//
// - config: images, limits, scaffold, markers
// - runtime: ContainerRuntime trait and the docker CLI implementation
// - workspace: per-run src/artifacts directories
// - classify: container output -> RunNotification
// - executor: the two-phase pipeline

pub mod classify;
pub mod config;
pub mod executor;
pub mod runtime;
pub mod workspace;

pub use classify::{classify_build, classify_run};
pub use config::{BuildMarkers, PhaseLimits, SandboxConfig};
pub use executor::{ExecutionOutcome, SandboxExecutor, UNAVAILABLE_MESSAGE};
pub use runtime::{ContainerOutput, ContainerRuntime, ContainerSpec, DockerCli, Mount, Termination};
pub use workspace::RunWorkspace;

/// Infrastructure failure inside the sandbox (not a build or run outcome)
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The container process could not be started or observed
    #[error("failed to start container: {0}")]
    Spawn(String),

    #[error("workspace error: {0}")]
    Workspace(String),
}
