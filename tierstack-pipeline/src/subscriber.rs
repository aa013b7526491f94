//! Read-only observers of one derived value of one object.

use crate::data::{PipelineData, TypedObject};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tierstack_types::LockKey;
use tracing::warn;

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

/// Identity of one [`DataSubscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// What the local cache stores for each registered subscriber.
pub(crate) trait SubscriberSlot: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Projects the object's current state and hands it to the callback.
    fn deliver(&self, object: &TypedObject);

    /// Records which object the subscriber is attached to, if any.
    fn link(&self, key: Option<LockKey>);
}

struct SubscriberInner<T, V> {
    id: SubscriberId,
    getter: Box<dyn Fn(&T) -> V + Send + Sync>,
    on_change: Box<dyn Fn(&V) + Send + Sync>,
    current: Mutex<V>,
    linked: Mutex<Option<LockKey>>,
    deliveries: AtomicU64,
}

/// Observes `getter(object)` for one object and calls `on_change` with the
/// new value whenever the object changes, locally or through replication.
///
/// Callbacks run on whichever task performed the change, so they must not
/// assume a particular thread. A subscriber is attached with
/// `Pipeline::subscribe` and stays attached until `Pipeline::unsubscribe` or
/// until the object is deleted.
pub struct DataSubscriber<T, V> {
    inner: Arc<SubscriberInner<T, V>>,
}

impl<T, V> DataSubscriber<T, V>
where
    T: PipelineData,
    V: Clone + Send + 'static,
{
    pub fn new(
        getter: impl Fn(&T) -> V + Send + Sync + 'static,
        on_change: impl Fn(&V) + Send + Sync + 'static,
        initial: V,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriberInner {
                id: SubscriberId(NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed)),
                getter: Box::new(getter),
                on_change: Box::new(on_change),
                current: Mutex::new(initial),
                linked: Mutex::new(None),
                deliveries: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// The most recently delivered value, or the initial one.
    pub fn current_value(&self) -> V {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The object this subscriber is attached to.
    pub fn linked_key(&self) -> Option<LockKey> {
        self.inner
            .linked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_linked(&self) -> bool {
        self.linked_key().is_some()
    }

    /// Number of values delivered so far.
    pub fn delivery_count(&self) -> u64 {
        self.inner.deliveries.load(Ordering::SeqCst)
    }

    pub(crate) fn slot(&self) -> Arc<dyn SubscriberSlot> {
        self.inner.clone()
    }
}

impl<T, V> Clone for DataSubscriber<T, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, V: fmt::Debug> fmt::Debug for DataSubscriber<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSubscriber")
            .field("id", &self.inner.id)
            .field("current", &self.inner.current)
            .finish()
    }
}

impl<T, V> SubscriberSlot for SubscriberInner<T, V>
where
    T: PipelineData,
    V: Clone + Send + 'static,
{
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, object: &TypedObject) {
        // Project under the object's lock, call back after releasing it.
        let value = match object.read_as::<T, _>(|data| (self.getter)(data)) {
            Ok(value) => value,
            Err(e) => {
                warn!("Cannot deliver to {}: {e}", self.id);
                return;
            }
        };
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = value.clone();
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        (self.on_change)(&value);
    }

    fn link(&self, key: Option<LockKey>) {
        *self.linked.lock().unwrap_or_else(PoisonError::into_inner) = key;
    }
}
