//! Pipeline error types.

use thiserror::Error;

/// Errors that can occur while running passes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An error propagated from the core domain layer.
    #[error("core error: {0}")]
    Core(#[from] quaver_core::Error),

    /// An error propagated from `reqwest`.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A catalog API answered with something we could not use.
    #[error("catalog error from {catalog}: {message}")]
    Catalog { catalog: &'static str, message: String },

    /// Audio could not be decoded or fingerprinted.
    #[error("audio error: {0}")]
    Audio(String),

    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The run cannot continue but nothing is wrong with the data — a
    /// missing credential file, an operator interrupt. The driver exits
    /// cleanly and leaves the queue as it stands.
    #[error("pipeline stopped: {0}")]
    Stop(String),

    /// The driver swept the queue more times than the trip cap allows,
    /// which means some pass keeps generating work for another.
    #[error("trip count exceeded")]
    TripLimit,
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Core(quaver_core::Error::from(e))
    }
}

impl PipelineError {
    /// Errors that end a run without marking it failed.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }
}

/// Convenience alias for pipeline results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
