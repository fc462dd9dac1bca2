use thiserror::Error;

/// Crate-level error taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// The store could not complete an operation. Aborts the current
    /// cycle only; the dispatcher retries on its next wake.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid setup, e.g. a duplicate handler registration. Fatal at
    /// startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// An append-once invariant was violated, e.g. a second dead-letter
    /// record for the same event.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An operator referenced an event id with no matching record.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result alias using [`OutboxError`].
pub type OutboxResult<T> = Result<T, OutboxError>;

/// How a handler invocation failed.
///
/// Only `Retryable` failures are rescheduled; `Fatal` failures send the
/// event straight to the dead-letter store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Transient failure (network, timeout, downstream unavailable).
    #[error("retryable: {0}")]
    Retryable(String),

    /// Permanent failure (malformed payload, unrecognized event type).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        HandlerError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        HandlerError::Fatal(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }
}
