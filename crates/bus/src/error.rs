//! Bus error type

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus was shut down
    #[error("bus closed")]
    Closed,

    /// The message could not be appended
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The offset could not be committed
    #[error("commit failed: {0}")]
    Commit(String),

    /// Messages could not be read
    #[error("fetch failed: {0}")]
    Fetch(String),
}
