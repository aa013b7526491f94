//! In-process publish/subscribe broker.
//!
//! Every subscription owns an unbounded queue drained by its own task, so a
//! slow listener never delays publishers or other subscriptions, and payloads
//! reach each listener in publish order. Publishers receive their own
//! payloads too when they subscribe to the topic they publish on.

use crate::error::SyncResult;
use crate::transport::{MessageListener, ReplicationTransport, SubscriptionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Subscription {
    topic: String,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

/// A [`ReplicationTransport`] living in process memory.
///
/// Cloning yields another handle to the same broker; hand one clone to each
/// simulated node.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .subscriptions
            .values()
            .filter(|sub| sub.topic == topic)
            .count()
    }
}

#[async_trait]
impl ReplicationTransport for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> SyncResult<usize> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;
        for sub in state.subscriptions.values().filter(|sub| sub.topic == topic) {
            if sub.sender.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!("Published {} bytes on {topic} to {delivered} subscriber(s)", payload.len());
        Ok(delivered)
    }

    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn MessageListener>,
    ) -> SyncResult<SubscriptionId> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Vec<u8>>();
        let topic_name = topic.to_string();

        let task = tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                let listener = Arc::clone(&listener);
                let topic = topic_name.clone();
                // A panicking listener loses this payload, never the subscription.
                let delivery =
                    tokio::spawn(async move { listener.on_message(&topic, &payload).await });
                if let Err(e) = delivery.await {
                    warn!("Listener on {topic_name} failed: {e}");
                }
            }
        });

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.next_id += 1;
        let id = SubscriptionId::new(state.next_id);
        state.subscriptions.insert(
            id,
            Subscription {
                topic: topic.to_string(),
                sender,
                task,
            },
        );
        debug!("Subscribed {id} to {topic}");
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> SyncResult<bool> {
        let removed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.subscriptions.remove(&subscription)
        };
        match removed {
            Some(sub) => {
                sub.task.abort();
                debug!("Unsubscribed {subscription} from {}", sub.topic);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
