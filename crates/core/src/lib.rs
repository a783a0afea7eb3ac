// Coderunner core
//
// Shared, storage-agnostic building blocks:
// - Run entity and the domain events that travel through the outbox
// - Progress notifications pushed to live clients
// - Session registry correlating run ids with open connections
// - Telemetry bootstrap and the startup gate used by background loops

pub mod events;
pub mod notification;
pub mod run;
pub mod session;
pub mod telemetry;
pub mod warmup;

pub use events::{DomainEvent, RunCodePayload, DEFAULT_TOPIC, RUN_CODE};
pub use notification::{Outcome, Phase, RunNotification};
pub use run::Run;
pub use session::{ChannelError, OutboundChannel, RecordingChannel, SessionRegistry};
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use warmup::Warmup;
