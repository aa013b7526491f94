//! Core type definitions for the tierstack data pipeline.
//!
//! This crate defines the small vocabulary shared by every layer:
//! - Object and session identifiers
//! - Tiers and the per-type `DataContext` that restricts them
//! - `DataDescriptor`, the explicit per-type metadata supplied at registration
//! - `LockKey`, from which lock names are derived deterministically

mod descriptor;
mod ids;

pub use descriptor::{
    DataContext, DataDescriptor, LockKey, PreloadStrategy, Tier, DEFAULT_IDLE_TIMEOUT,
};
pub use ids::{ObjectId, SessionId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
}
