//! Error types for the pipeline.

use thiserror::Error;
use tierstack_storage::StorageError;
use tierstack_sync::SyncError;
use tierstack_types::{LockKey, Tier};

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur in pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A handle was used after its object left the local tier. Load the
    /// object again to get a fresh handle.
    #[error("access to {key} is no longer valid")]
    AccessInvalid { key: LockKey },

    /// A tier backend failed while the pipeline needed it.
    #[error("{tier} operation failed: {source}")]
    TierOperationFailed { tier: Tier, source: StorageError },

    /// An inbound replication block could not be applied.
    #[error("replication apply failed: {0}")]
    ReplicationApplyFailed(String),

    /// The type was never registered with this pipeline.
    #[error("type not registered: {0}")]
    TypeNotRegistered(&'static str),

    /// Another type already owns this storage identifier.
    #[error("storage identifier {identifier:?} is already registered to {existing}")]
    DuplicateStorageIdentifier {
        identifier: String,
        existing: &'static str,
    },

    /// The type is already registered with a different descriptor.
    #[error("{0} is already registered with a different descriptor")]
    ConflictingRegistration(&'static str),

    /// No tier holds the object.
    #[error("no data for {key}")]
    NotFound { key: LockKey },

    /// The object does not have the requested Rust type.
    #[error("{key} is not a {expected}")]
    TypeMismatch { key: LockKey, expected: &'static str },

    /// Invalid type metadata.
    #[error("invalid descriptor: {0}")]
    Descriptor(#[from] tierstack_types::Error),

    /// Lock or replication failure.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pipeline was shut down.
    #[error("pipeline is shut down")]
    ShutDown,
}

impl PipelineError {
    /// Wraps a backend error with the tier it came from.
    pub(crate) fn tier(tier: Tier) -> impl FnOnce(StorageError) -> Self {
        move |source| Self::TierOperationFailed { tier, source }
    }
}
