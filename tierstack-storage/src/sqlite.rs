//! Durable storage in a single SQLite table.
//!
//! Every object is one row keyed by (storage path, uuid) holding its JSON
//! text. Queries run on the blocking pool so the async callers never stall a
//! runtime worker.

use crate::error::{StorageError, StorageResult};
use crate::provider::DataProvider;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tierstack_types::{DataDescriptor, ObjectId};
use tracing::{debug, warn};

/// Storage backed by SQLite.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Opens (or creates) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!("Opened SQLite storage at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tier_objects (
                path TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (path, id)
            );
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StorageError::Backend("sqlite connection lock poisoned".into()))?;
            f(&conn)
        })
        .await?
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[async_trait]
impl DataProvider for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn exists(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        let path = descriptor.storage_path();
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM tier_objects WHERE path = ?1 AND id = ?2",
                    params![path, id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn load_serialized(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> StorageResult<Option<Value>> {
        let path = descriptor.storage_path();
        self.run(move |conn| {
            let text: Option<String> = conn
                .query_row(
                    "SELECT data FROM tier_objects WHERE path = ?1 AND id = ?2",
                    params![path, id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match text {
                Some(text) => Ok(Some(serde_json::from_str(&text)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn save(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
        data: Value,
    ) -> StorageResult<()> {
        let path = descriptor.storage_path();
        let text = serde_json::to_string(&data)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO tier_objects (path, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(path, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                params![path, id.to_string(), text, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        let path = descriptor.storage_path();
        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM tier_objects WHERE path = ?1 AND id = ?2",
                params![path, id.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_ids(&self, descriptor: &DataDescriptor) -> StorageResult<HashSet<ObjectId>> {
        let path = descriptor.storage_path();
        self.run(move |conn| {
            let mut stmt = conn.prepare("SELECT id FROM tier_objects WHERE path = ?1")?;
            let rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;

            let mut ids = HashSet::new();
            for row in rows {
                let raw = row?;
                match ObjectId::parse(&raw) {
                    Ok(id) => {
                        ids.insert(id);
                    }
                    Err(e) => warn!("Skipping row with malformed id {raw:?}: {e}"),
                }
            }
            Ok(ids)
        })
        .await
    }
}
