//! Error types for the lock and replication layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in lock and replication operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The transport could not deliver or register.
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error (invalid block format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The lock service could not grant a lock.
    #[error("lock error: {0}")]
    Lock(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}
