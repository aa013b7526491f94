//! Transport layer abstraction.
//!
//! A replication transport is a topic-based publish/subscribe bus carrying
//! opaque payloads. The pipeline never talks to a concrete bus directly, so
//! any backend (an in-process broker, a Redis-style pub/sub, a message queue)
//! can sit underneath.

use crate::error::SyncResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Handle returned by [`ReplicationTransport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receives payloads published on a subscribed topic.
///
/// Transports call a listener for one payload at a time per subscription,
/// in the order the payloads were published.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, topic: &str, payload: &[u8]);
}

/// A topic-based publish/subscribe bus.
#[async_trait]
pub trait ReplicationTransport: Send + Sync {
    /// Publishes a payload and returns how many subscriptions received it.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> SyncResult<usize>;

    /// Starts delivering payloads on `topic` to `listener`.
    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn MessageListener>,
    ) -> SyncResult<SubscriptionId>;

    /// Stops a subscription. Returns false if it was not active.
    async fn unsubscribe(&self, subscription: SubscriptionId) -> SyncResult<bool>;
}
