//! Typed replication channel for one registered type.

use crate::error::SyncResult;
use crate::protocol::ReplicationBlock;
use crate::transport::{MessageListener, ReplicationTransport, SubscriptionId};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives decoded blocks from a [`ReplicationChannel`].
#[async_trait]
pub trait BlockListener: Send + Sync {
    async fn on_block(&self, block: ReplicationBlock);
}

/// Publishes and receives [`ReplicationBlock`]s on one topic.
#[derive(Clone)]
pub struct ReplicationChannel {
    topic: String,
    transport: Arc<dyn ReplicationTransport>,
}

impl ReplicationChannel {
    pub fn new(topic: impl Into<String>, transport: Arc<dyn ReplicationTransport>) -> Self {
        Self {
            topic: topic.into(),
            transport,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Broadcasts a block. Returns how many subscriptions received it.
    pub async fn publish(&self, block: &ReplicationBlock) -> SyncResult<usize> {
        let payload = block.encode()?;
        let receivers = self.transport.publish(&self.topic, payload).await?;
        debug!(
            "Sent {} block for {} on {} ({receivers} receiver(s))",
            block.kind(),
            block.object_id(),
            self.topic
        );
        Ok(receivers)
    }

    /// Delivers every well-formed block on the topic to `listener`.
    /// Malformed payloads are logged and dropped.
    pub async fn subscribe(&self, listener: Arc<dyn BlockListener>) -> SyncResult<SubscriptionId> {
        self.transport
            .subscribe(&self.topic, Arc::new(DecodingListener { listener }))
            .await
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionId) -> SyncResult<bool> {
        self.transport.unsubscribe(subscription).await
    }
}

struct DecodingListener {
    listener: Arc<dyn BlockListener>,
}

#[async_trait]
impl MessageListener for DecodingListener {
    async fn on_message(&self, topic: &str, payload: &[u8]) {
        match ReplicationBlock::decode(payload) {
            Ok(block) => self.listener.on_block(block).await,
            Err(e) => warn!("Dropping block on {topic}: {e}"),
        }
    }
}
