// Storage layer for Coderunner
// Decision: Support both PostgreSQL (production) and in-memory (dev mode)
//
// - Database: PostgreSQL repositories (runs, atomic schedule transaction)
// - InMemoryDatabase: dev-mode equivalent
// - StorageBackend: enum dispatch over both, plus the matching outbox store

pub mod backend;
pub mod memory;
pub mod models;
pub mod repositories;

pub use backend::{StorageBackend, StorageConfig};
pub use memory::InMemoryDatabase;
pub use models::RunRow;
pub use repositories::Database;
