//! Error types for nirivana-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nirivana-core.
///
/// Every failure path surfaces one of these kinds; [`Error::name`] yields the
/// stable token used in structured log lines.
#[derive(Error, Debug)]
pub enum Error {
    /// The event log writer lock is held by another process.
    #[error("event store is locked: {0}")]
    Locked(String),

    /// No snapshot exists at or before the requested timestamp.
    #[error("no snapshot at or before timestamp")]
    NoSnapshot,

    /// The retention pruner refused to run while a writer holds the lock.
    #[error("active writer lock present: {0}")]
    ActiveWriter(String),

    /// An event failed validation on the append or strict read path.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A snapshot failed validation.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// JSON encoding or decoding failed.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The compositor snapshotter could not produce a snapshot blob.
    #[error("collector unavailable: {0}")]
    CollectorUnavailable(String),

    /// Reading process metadata from the process table failed.
    #[error("process inspect failed: {0}")]
    ProcessInspect(String),

    /// A value failed a structural validation check.
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

impl Error {
    /// Stable name token for structured log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Locked(_) => "locked",
            Self::NoSnapshot => "no_snapshot",
            Self::ActiveWriter(_) => "active_writer",
            Self::InvalidEvent(_) => "invalid_event",
            Self::InvalidSnapshot(_) => "invalid_snapshot",
            Self::Decode(_) => "decode",
            Self::Io(_) => "io",
            Self::CollectorUnavailable(_) => "collector_unavailable",
            Self::ProcessInspect(_) => "process_inspect",
            Self::ValidationFailed(_) => "validation_failed",
        }
    }
}
