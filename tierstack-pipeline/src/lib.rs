//! Tiered data pipeline for tierstack.
//!
//! Objects live in up to three tiers: the node's local cache, an optional
//! distributed cache shared by every node, and optional durable storage.
//! The pipeline keeps them consistent across nodes.
//!
//! # Architecture
//!
//! - **Registry**: maps each Rust type to its [`DataDescriptor`](tierstack_types::DataDescriptor)
//!   and a factory
//! - **Local cache**: the node's working set of live objects
//! - **Tier synchronizer**: copies serialized state between tiers,
//!   honouring each type's `DataContext`
//! - **Access**: lock-guarded read and write handles
//! - **Synchronizer**: publishes creations, updates and removals and applies
//!   the ones other nodes publish
//! - **Subscribers**: observe one derived value of one object
//! - **Pipeline**: the facade tying it together
//!
//! ## Lookup chain
//!
//! `load` checks the local cache, then the distributed cache, then storage,
//! copying the first hit into the local cache. `load_or_create` repeats the
//! lookup under the object's write lock before creating it, so concurrent
//! creators on different nodes end up with a single object.
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use tierstack_pipeline::{Pipeline, PipelineData};
//! use tierstack_types::{DataDescriptor, ObjectId};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Counter {
//!     value: i64,
//! }
//!
//! impl PipelineData for Counter {
//!     fn instantiate(_id: ObjectId) -> Self {
//!         Counter { value: 0 }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> tierstack_pipeline::PipelineResult<()> {
//! let pipeline = Pipeline::builder().build()?;
//! pipeline.register_type::<Counter>(DataDescriptor::new("counters")).await?;
//!
//! let id = ObjectId::new();
//! let counter = pipeline.load_or_create::<Counter>(id).await?;
//! counter.update(false, |c| c.value += 1).await?;
//!
//! let read = counter.read().await?;
//! assert_eq!(read.with(|c| c.value)?, 1);
//! # Ok(())
//! # }
//! ```

mod access;
mod builder;
mod config;
mod data;
mod engine;
mod error;
mod local_cache;
mod maintenance;
mod pipeline;
mod reference;
mod registry;
mod subscriber;
mod synchronizer;
mod tier_sync;

pub use access::{AccessEntry, DataAccess, ReadHandle, WriteHandle};
pub use builder::PipelineBuilder;
pub use config::PipelineConfig;
pub use data::{PipelineData, TypedObject};
pub use error::{PipelineError, PipelineResult};
pub use local_cache::LocalCache;
pub use pipeline::{LoadingStrategy, Pipeline};
pub use reference::DataReference;
pub use registry::{DataRegistry, TypeEntry};
pub use subscriber::{DataSubscriber, SubscriberId};
pub use synchronizer::{ApplyOutcome, BlockApplier, Synchronizer};
pub use tier_sync::TierSynchronizer;
