//! Errors surfaced to callers of the queue layer

use crate::persistence::StoreError;

/// Error type for queue, status and stats operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The queue name was never registered
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// The job store is unreachable or closed
    #[error("job store unavailable: {0}")]
    Connection(String),

    /// A queue definition failed validation at registration
    #[error("invalid queue definition: {0}")]
    InvalidDefinition(String),

    /// The producer was closed during shutdown
    #[error("queue {0} is closed")]
    QueueClosed(String),

    /// Any other store failure
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        if err.is_unavailable() {
            Self::Connection(err.to_string())
        } else {
            Self::Store(err)
        }
    }
}
