// Coderunner Control Plane Library
// Decision: Shared library for binaries (API server, OpenAPI export) and integration tests

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Process wiring
pub mod app;
pub use app::{select_bus, Coderunner};

// Server configuration
pub mod config;
pub use config::ServerConfig;

// Services layer
pub mod services;
pub use services::RunService;

// OpenAPI spec generation
pub mod openapi;
