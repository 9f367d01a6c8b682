//! Byte-addressable object storage.
//!
//! Evidence bytes and export packages live behind [`ObjectStore`]. Two providers ship with
//! Warden: [`MemoryObjectStore`] for tests and single-process deployments, and
//! [`FsObjectStore`] which maps keys onto files below a root directory.

use crate::error::{Result, WardenError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Abstract object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Fetch an object. Missing keys yield [`WardenError::ObjectNotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete an object. Missing keys yield [`WardenError::ObjectNotFound`].
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Reject keys that could escape a filesystem root.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(WardenError::Validation(format!("invalid object key: {:?}", key)));
    }
    let clean = Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !clean {
        return Err(WardenError::Validation(format!("invalid object key: {:?}", key)));
    }
    Ok(())
}

/// In-memory object store.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.objects.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| WardenError::ObjectNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| WardenError::ObjectNotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// Directory under the root holding in-flight writes. Never listed and not addressable by key.
const STAGING_DIR: &str = ".staging";

/// Filesystem-backed object store.
pub struct FsObjectStore {
    root: PathBuf,
    staging: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging).await?;
        Ok(Self { root, staging })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        if key.split('/').next() == Some(STAGING_DIR) {
            return Err(WardenError::Validation(format!("reserved object key: {:?}", key)));
        }
        Ok(self.root.join(key))
    }
}

fn map_not_found(key: &str, e: std::io::Error) -> WardenError {
    if e.kind() == std::io::ErrorKind::NotFound {
        WardenError::ObjectNotFound(key.to_string())
    } else {
        WardenError::Storage(format!("{}: {}", key, e))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write into the staging directory and rename so readers never see a partial object.
        let tmp = self.staging.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| WardenError::Storage(format!("{}: {}", key, e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| WardenError::Storage(format!("{}: {}", key, e)))?;

        debug!(key, bytes = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| map_not_found(key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| map_not_found(key, e))?;
        debug!(key, "Deleted object");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path == self.staging {
                    continue;
                }
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
