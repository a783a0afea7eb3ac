pub mod consumer;
pub mod handler;
pub mod sandbox;

// Re-export main types
pub use consumer::{
    ConsumerConfig, ConsumerError, DedupWindow, Dispatch, ExecutionConsumer, MessageHandler,
};
pub use handler::RunCodeHandler;
pub use sandbox::{
    ContainerRuntime, DockerCli, ExecutionOutcome, SandboxConfig, SandboxError, SandboxExecutor,
};
