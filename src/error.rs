// Typed failures for the scheduling and aggregation core.
// Retry policy belongs to the caller; the core only reports what went wrong.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Scheduling or update requested for an id that is not a registered peer.
    #[error("no such agent: {0}")]
    NoSuchAgent(String),

    /// The persistence backend could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// A reported probe result failed validation.
    #[error("malformed result: {0}")]
    MalformedResult(String),

    /// Nothing left to fold: the batch was empty or every entry was malformed.
    #[error("empty batch for {agent_id} -> {target_id}")]
    EmptyBatch { agent_id: String, target_id: String },

    /// The stored summary changed between load and commit.
    #[error("summary for {agent_id} -> {target_id} changed concurrently (expected version {expected})")]
    Conflict {
        agent_id: String,
        target_id: String,
        expected: u64,
    },
}

impl CoreError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        CoreError::MalformedResult(reason.into())
    }

    /// Transient failures the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::StoreUnavailable(_) | CoreError::Conflict { .. }
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::StoreUnavailable(Box::new(e))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
