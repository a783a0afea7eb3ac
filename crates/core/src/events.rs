// Domain Event Protocol
//
// Events written to the outbox and carried over the bus.
// Wire shape: {"eventType": "...", "payload": {...}}.
// The bus message key is the event key (the stringified run id), so all
// events for one run land on the same partition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Event Type Constants
// ============================================================================

pub const RUN_CODE: &str = "run.code";

/// Topic the outbox publishes to and the execution consumer subscribes to
pub const DEFAULT_TOPIC: &str = "coderunner_outbox_events";

// ============================================================================
// Payloads
// ============================================================================

/// Payload of a `run.code` event. Only the id travels; the handler loads the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunCodePayload {
    pub code_run_id: Uuid,
}

// ============================================================================
// Domain Event
// ============================================================================

/// Typed domain event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "eventType", content = "payload")]
pub enum DomainEvent {
    /// A run was scheduled and should be built and executed
    #[serde(rename = "run.code")]
    RunCode(RunCodePayload),
}

impl DomainEvent {
    /// Create a run.code event for the given run
    pub fn run_code(code_run_id: Uuid) -> Self {
        Self::RunCode(RunCodePayload { code_run_id })
    }

    /// Event type name, stored in the outbox `type` column
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunCode(_) => RUN_CODE,
        }
    }

    /// Partitioning key, stored in the outbox `key` column
    pub fn event_key(&self) -> String {
        match self {
            Self::RunCode(p) => p.code_run_id.hyphenated().to_string(),
        }
    }

    /// Serialize to the wire payload
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a bus message value
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
