//! Cluster locks and change replication for the tierstack data pipeline.
//!
//! # Components
//!
//! - **Lock**: per-object read/write locks, process-local or cluster-wide
//! - **Transport**: abstracts over the publish/subscribe bus
//! - **Broker**: an in-process bus for single-node use and cluster tests
//! - **Protocol**: the creation/update/removal blocks exchanged by nodes
//! - **Channel**: typed publish/subscribe of blocks on one topic
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tierstack_sync::{ClusterLockService, MemoryLockBackend, NetworkLockService};
//! use tierstack_types::{DataDescriptor, ObjectId};
//!
//! let backend = Arc::new(MemoryLockBackend::new());
//! let locks = ClusterLockService::new(backend);
//! let key = DataDescriptor::new("players").lock_key(ObjectId::new());
//! let write = locks.write_lock(&key);
//! assert!(write.name().starts_with("Lock:"));
//! ```

mod broker;
mod channel;
mod error;
mod lock;
pub mod protocol;
pub mod transport;

pub use broker::MemoryBroker;
pub use channel::{BlockListener, ReplicationChannel};
pub use error::{SyncError, SyncResult};
pub use lock::{
    ClusterLockService, LocalLockService, LockBackend, LockGuard, LockMode, MemoryLockBackend,
    NetworkLock, NetworkLockService,
};
pub use protocol::ReplicationBlock;
pub use transport::{MessageListener, ReplicationTransport, SubscriptionId};
