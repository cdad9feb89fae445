use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors returned by the scheduler's own API.
///
/// Handler failures never surface here; they are recorded on the item
/// (see [`IngestError`]).
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid target URL {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Invalid preferences: {0}")]
    InvalidPreferences(String),

    #[error("Target is already queued or processing: {0}")]
    AlreadyQueued(String),

    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Retry limit reached for {target} ({max_retries} retries)")]
    RetryLimitReached { target: String, max_retries: u32 },

    #[error("Only failed items can be requeued ({target} is {status})")]
    NotRetryable { target: String, status: String },

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

impl QueueError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Other(err.to_string())
    }
}

/// Failure reported by an [`IngestionHandler`](crate::IngestionHandler).
///
/// The variant becomes the item's `error_type`, the display text its
/// `error_message`.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Validation(String),

    #[error("Transcript unavailable: {0}")]
    Transcript(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Storage failed: {0}")]
    Storage(String),

    #[error("Handler exceeded deadline of {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Stable type tag recorded on failed items.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "ValidationError",
            IngestError::Transcript(_) => "TranscriptError",
            IngestError::Summarization(_) => "SummarizationError",
            IngestError::Storage(_) => "StorageError",
            IngestError::Timeout(_) => "TimeoutError",
            IngestError::Other(_) => "Error",
        }
    }
}
