//! Error types for the reminder relay.

/// Top-level error type for the dispatch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Reminder, log, or preference persistence error.
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Preference lookup, validation, or cache error.
    #[error("preference error: {0}")]
    Preference(#[from] crate::preferences::PreferenceError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Work-queue send/receive error.
    #[error("queue error: {0}")]
    Queue(String),

    /// A reminder could not be claimed for dispatch.
    #[error("claim refused: {0}")]
    Claim(String),

    /// Scheduler loop error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RelayError>;
