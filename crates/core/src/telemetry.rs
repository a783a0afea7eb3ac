// Telemetry Module
//
// Structured logging setup shared by every Coderunner binary:
// - Configuration from environment variables
// - EnvFilter-driven console output via tracing-subscriber
// - Span naming helpers for the execution pipeline

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::notification::Phase;

/// Default filter when neither RUST_LOG nor LOG_LEVEL is set
pub const DEFAULT_LOG_FILTER: &str = "coderunner=debug,tower_http=debug,info";

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Service version
    pub service_version: Option<String>,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Whether to emit JSON lines instead of the human-readable format
    pub json: bool,
    /// Log filter (e.g., "info", "debug", "coderunner=debug")
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "coderunner".to_string(),
            service_version: None,
            enable_console: true,
            json: false,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "coderunner")
    /// - `SERVICE_VERSION`: Service version
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "json" for JSON lines
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "coderunner".to_string()),
            service_version: std::env::var("SERVICE_VERSION").ok(),
            enable_console: true,
            json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Resolve the effective filter, falling back to the default on parse errors
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Install the global tracing subscriber.
///
/// Calling it twice is harmless; the second call leaves the first subscriber
/// in place.
///
/// ```ignore
/// use coderunner_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env());
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) {
    let filter = config.env_filter();

    let console_layer = if !config.enable_console {
        None
    } else if config.json {
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_filter(filter)
                .boxed(),
        )
    } else {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(filter)
                .boxed(),
        )
    };

    if tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_err()
    {
        return;
    }

    tracing::info!(
        service = %config.service_name,
        version = config.service_version.as_deref().unwrap_or("unknown"),
        "telemetry initialized"
    );
}

// ============================================================================
// Span Helpers
// ============================================================================

/// Span name for one sandbox phase
///
/// Format: `sandbox.{phase}`
/// Example: "sandbox.build"
pub fn phase_span_name(phase: Phase) -> String {
    format!("sandbox.{}", phase)
}
