//! Per-type metadata: which tiers a type may touch, how it is preloaded and
//! how its storage, lock and topic names are derived.

use crate::ids::ObjectId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Idle time after which an unused object is evicted from the local tier.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// One of the three places an object's serialized form can live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// The in-process working set of live objects.
    Local,
    /// A cache shared by every node of the cluster.
    DistributedCache,
    /// The durable store.
    Storage,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::DistributedCache => "distributed-cache",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Restricts which tiers a type may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataContext {
    /// Local, distributed cache and storage.
    #[default]
    Global,
    /// Local and distributed cache.
    CacheOnly,
    /// Local and storage.
    StorageOnly,
    /// Never leaves the local tier.
    Local,
}

impl DataContext {
    /// Returns true if objects of this context may be copied to or from the
    /// distributed cache.
    #[must_use]
    pub const fn is_cache_allowed(self) -> bool {
        matches!(self, Self::Global | Self::CacheOnly)
    }

    /// Returns true if objects of this context may be copied to or from
    /// storage.
    #[must_use]
    pub const fn is_storage_allowed(self) -> bool {
        matches!(self, Self::Global | Self::StorageOnly)
    }

    /// Returns true if the given tier is legal for this context.
    #[must_use]
    pub const fn allows(self, tier: Tier) -> bool {
        match tier {
            Tier::Local => true,
            Tier::DistributedCache => self.is_cache_allowed(),
            Tier::Storage => self.is_storage_allowed(),
        }
    }
}

/// When objects of a type are pulled into the local tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadStrategy {
    /// Lazily, on first access.
    #[default]
    LoadOnNeed,
    /// Eagerly, at registration and on `preload_all`.
    LoadBefore,
}

/// Static description of a registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDescriptor {
    classifier: String,
    identifier: String,
    context: DataContext,
    preload: PreloadStrategy,
    idle_timeout: Option<Duration>,
}

impl DataDescriptor {
    /// Creates a descriptor with the given storage identifier, no classifier,
    /// the global context, lazy loading and the default idle timeout.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            classifier: String::new(),
            identifier: identifier.into(),
            context: DataContext::default(),
            preload: PreloadStrategy::default(),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    /// Places the type in a classifier namespace.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = classifier.into();
        self
    }

    /// Sets the tier context.
    #[must_use]
    pub fn with_context(mut self, context: DataContext) -> Self {
        self.context = context;
        self
    }

    /// Sets the preload strategy.
    #[must_use]
    pub fn with_preload(mut self, preload: PreloadStrategy) -> Self {
        self.preload = preload;
        self
    }

    /// Sets how long an object may sit unused in the local tier before it is
    /// evicted. `None` keeps objects resident until `save_all`.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Checks that the names can be used as path segments and key parts.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(Error::InvalidDescriptor("storage identifier is empty".into()));
        }
        for (what, value) in [("identifier", &self.identifier), ("classifier", &self.classifier)] {
            if let Some(c) = value.chars().find(|c| !is_name_char(*c)) {
                return Err(Error::InvalidDescriptor(format!(
                    "{what} {value:?} contains invalid character {c:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn classifier(&self) -> &str {
        &self.classifier
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn context(&self) -> DataContext {
        self.context
    }

    pub fn preload(&self) -> PreloadStrategy {
        self.preload
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Namespace used by tier backends: `classifier:identifier`, or just the
    /// identifier when no classifier is set.
    pub fn storage_path(&self) -> String {
        if self.classifier.is_empty() {
            self.identifier.clone()
        } else {
            format!("{}:{}", self.classifier, self.identifier)
        }
    }

    /// Replication topic shared by every node that registers this type.
    pub fn replication_topic(&self) -> String {
        format!("tierstack:{}", self.storage_path())
    }

    /// Lock key for one object of this type.
    pub fn lock_key(&self, id: ObjectId) -> LockKey {
        LockKey {
            classifier: self.classifier.clone(),
            identifier: self.identifier.clone(),
            id,
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Identity of one object across the cluster: (classifier, type identifier,
/// object id). Every node derives the same names from the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    classifier: String,
    identifier: String,
    id: ObjectId,
}

impl LockKey {
    pub fn classifier(&self) -> &str {
        &self.classifier
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Name of the lock in a shared lock service:
    /// `Lock:[classifier:]id:identifier`.
    pub fn distributed_name(&self) -> String {
        format!("Lock:{}", self.local_name())
    }

    /// Name of the lock inside one process: `[classifier:]id:identifier`.
    pub fn local_name(&self) -> String {
        if self.classifier.is_empty() {
            format!("{}:{}", self.id, self.identifier)
        } else {
            format!("{}:{}:{}", self.classifier, self.id, self.identifier)
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.local_name())
    }
}
