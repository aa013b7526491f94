//! Per-object read/write locks, scoped to a [`LockKey`].
//!
//! Two interchangeable services implement [`NetworkLockService`]:
//! - [`LocalLockService`] guards objects inside one process
//! - [`ClusterLockService`] names each lock deterministically and asks a
//!   shared [`LockBackend`] for it, so every node contends on the same lock
//!
//! Acquisition waits as long as it takes; callers that want a timeout wrap
//! the future in `tokio::time::timeout`. A [`LockGuard`] releases its lock
//! when dropped, on every exit path.

use crate::error::SyncResult;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tierstack_types::LockKey;
use tokio::sync::RwLock;
use tracing::trace;

/// Whether a lock is shared or exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared with other readers, excluded by writers.
    Read,
    /// Excludes every other reader and writer.
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Proof that a lock is held. Dropping it releases the lock.
pub struct LockGuard {
    name: String,
    mode: LockMode,
    _held: Box<dyn Any + Send + Sync>,
}

impl LockGuard {
    /// Wraps whatever backend-specific value keeps the lock held.
    pub fn new(name: impl Into<String>, mode: LockMode, held: impl Any + Send + Sync) -> Self {
        let name = name.into();
        trace!("Acquired {mode} lock {name}");
        Self {
            name,
            mode,
            _held: Box::new(held),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        trace!("Released {} lock {}", self.mode, self.name);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

/// One lock (read or write side) for one key.
#[async_trait]
pub trait NetworkLock: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> LockMode;

    /// Waits until the lock is granted.
    async fn acquire(&self) -> SyncResult<LockGuard>;
}

/// Hands out the read and write side of the lock for a key.
pub trait NetworkLockService: Send + Sync {
    fn read_lock(&self, key: &LockKey) -> Arc<dyn NetworkLock>;

    fn write_lock(&self, key: &LockKey) -> Arc<dyn NetworkLock>;
}

// ── Named lock table ──────────────────────────────────────────────

/// Read/write locks created on first use and looked up by name.
#[derive(Debug, Default)]
struct LockTable {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockTable {
    fn get(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

async fn acquire_rw(lock: Arc<RwLock<()>>, name: &str, mode: LockMode) -> LockGuard {
    match mode {
        LockMode::Read => LockGuard::new(name, mode, lock.read_owned().await),
        LockMode::Write => LockGuard::new(name, mode, lock.write_owned().await),
    }
}

// ── Process-local ─────────────────────────────────────────────────

/// Locks that only exclude tasks of the same process.
#[derive(Debug, Default)]
pub struct LocalLockService {
    table: LockTable,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys that have been locked so far.
    pub fn tracked_keys(&self) -> usize {
        self.table.len()
    }

    fn lock(&self, key: &LockKey, mode: LockMode) -> Arc<dyn NetworkLock> {
        let name = key.local_name();
        let lock = self.table.get(&name);
        Arc::new(LocalLock { name, mode, lock })
    }
}

impl NetworkLockService for LocalLockService {
    fn read_lock(&self, key: &LockKey) -> Arc<dyn NetworkLock> {
        self.lock(key, LockMode::Read)
    }

    fn write_lock(&self, key: &LockKey) -> Arc<dyn NetworkLock> {
        self.lock(key, LockMode::Write)
    }
}

struct LocalLock {
    name: String,
    mode: LockMode,
    lock: Arc<RwLock<()>>,
}

#[async_trait]
impl NetworkLock for LocalLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> LockMode {
        self.mode
    }

    async fn acquire(&self) -> SyncResult<LockGuard> {
        Ok(acquire_rw(Arc::clone(&self.lock), &self.name, self.mode).await)
    }
}

// ── Cluster-wide ──────────────────────────────────────────────────

/// A lock service shared by every node, addressed by lock name.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Waits until the named lock is granted in the given mode.
    async fn acquire(&self, name: &str, mode: LockMode) -> SyncResult<LockGuard>;
}

/// Locks that exclude every node sharing the same backend.
///
/// Names are `Lock:[classifier:]id:identifier`, so nodes that register the
/// same type contend on the same lock without coordinating.
#[derive(Clone)]
pub struct ClusterLockService {
    backend: Arc<dyn LockBackend>,
}

impl ClusterLockService {
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    fn lock(&self, key: &LockKey, mode: LockMode) -> Arc<dyn NetworkLock> {
        Arc::new(ClusterLock {
            name: key.distributed_name(),
            mode,
            backend: Arc::clone(&self.backend),
        })
    }
}

impl NetworkLockService for ClusterLockService {
    fn read_lock(&self, key: &LockKey) -> Arc<dyn NetworkLock> {
        self.lock(key, LockMode::Read)
    }

    fn write_lock(&self, key: &LockKey) -> Arc<dyn NetworkLock> {
        self.lock(key, LockMode::Write)
    }
}

struct ClusterLock {
    name: String,
    mode: LockMode,
    backend: Arc<dyn LockBackend>,
}

#[async_trait]
impl NetworkLock for ClusterLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> LockMode {
        self.mode
    }

    async fn acquire(&self) -> SyncResult<LockGuard> {
        self.backend.acquire(&self.name, self.mode).await
    }
}

/// A [`LockBackend`] living in process memory. Sharing one instance between
/// several pipelines simulates a cluster in tests.
#[derive(Debug, Default)]
pub struct MemoryLockBackend {
    table: LockTable,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn acquire(&self, name: &str, mode: LockMode) -> SyncResult<LockGuard> {
        Ok(acquire_rw(self.table.get(name), name, mode).await)
    }
}
