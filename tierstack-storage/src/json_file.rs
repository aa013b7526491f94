//! Durable storage as one pretty-printed JSON file per object.
//!
//! Layout: `<root>/[<classifier>/]<identifier>/<uuid>.json`.

use crate::error::StorageResult;
use crate::provider::DataProvider;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tierstack_types::{DataDescriptor, ObjectId};
use tracing::{debug, warn};

const EXTENSION: &str = "json";

/// File-per-object storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    /// Opens (creating if needed) storage under the given directory.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        debug!("Opened JSON file storage at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn type_dir(&self, descriptor: &DataDescriptor) -> PathBuf {
        let mut dir = self.root.clone();
        if !descriptor.classifier().is_empty() {
            dir.push(descriptor.classifier());
        }
        dir.push(descriptor.identifier());
        dir
    }

    fn object_path(&self, descriptor: &DataDescriptor, id: ObjectId) -> PathBuf {
        self.type_dir(descriptor).join(format!("{id}.{EXTENSION}"))
    }
}

#[async_trait]
impl DataProvider for JsonFileStorage {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn exists(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(self.object_path(descriptor, id)).await?)
    }

    async fn load_serialized(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
    ) -> StorageResult<Option<Value>> {
        match tokio::fs::read(self.object_path(descriptor, id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(
        &self,
        descriptor: &DataDescriptor,
        id: ObjectId,
        data: Value,
    ) -> StorageResult<()> {
        let path = self.object_path(descriptor, id);
        let dir = self.type_dir(descriptor);
        tokio::fs::create_dir_all(&dir).await?;

        // Write-then-rename so a crash never leaves a half-written object.
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        let bytes = serde_json::to_vec_pretty(&data)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, descriptor: &DataDescriptor, id: ObjectId) -> StorageResult<bool> {
        match tokio::fs::remove_file(self.object_path(descriptor, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_ids(&self, descriptor: &DataDescriptor) -> StorageResult<HashSet<ObjectId>> {
        let mut ids = HashSet::new();
        let mut dir = match tokio::fs::read_dir(self.type_dir(descriptor)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match ObjectId::parse(stem) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => warn!("Skipping unexpected file {}: {e}", path.display()),
            }
        }
        Ok(ids)
    }
}

