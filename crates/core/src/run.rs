// Run domain types
//
// A Run is a single user-submitted snippet scheduled for execution.
// Created once per schedule request and immutable afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Run - one scheduled execution of user code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Run {
    /// Unique identifier for the run. Also the session key and bus message key.
    pub id: Uuid,
    /// Source code submitted by the client.
    pub code: String,
    /// Timestamp when the run was scheduled.
    pub scheduled_at: DateTime<Utc>,
}

impl Run {
    /// Create a new run with a fresh time-ordered id
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            code: code.into(),
            scheduled_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_ids_are_unique() {
        let a = Run::new("print(1)");
        let b = Run::new("print(1)");
        assert_ne!(a.id, b.id);
        assert_eq!(a.code, "print(1)");
    }

    #[test]
    fn test_run_serialization() {
        let run = Run::new("x");
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["code"], "x");
        assert!(json["scheduled_at"].is_string());
    }
}
