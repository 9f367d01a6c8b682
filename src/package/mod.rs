//! Signed evidence export packages.
//!
//! A package is a set of files plus `manifest.json`, which lists every file with its SHA-256,
//! and `manifest.sig`, a base64 Ed25519 signature over the exact manifest bytes. Anyone holding
//! the archive and the public key can check it offline with [`verify_package`].
//!
//! ```text
//! evidence/<evidence_id>/<file name>
//! custody/<evidence_id>.json
//! manifest.json
//! manifest.sig
//! ```

mod builder;
mod manifest;
pub mod signing;
mod verifier;

pub use builder::{EvidenceFilter, PackageBuilder, PackageResult, SkippedItem, MAX_QUERY_LEN};
pub use manifest::{ManifestEntry, PackageManifest, SIGNATURE_ALGO};
pub use signing::{SigningKey, SigningKeyring};
pub use verifier::{verify_package, FileCheck, VerificationReport};

use crate::error::{Result, WardenError};
use crate::object_store::{validate_key, ObjectStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Archive path of the manifest.
pub const MANIFEST_PATH: &str = "manifest.json";

/// Archive path of the detached manifest signature.
pub const SIGNATURE_PATH: &str = "manifest.sig";

/// Files of a package keyed by archive path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageArchive {
    files: BTreeMap<String, Vec<u8>>,
}

impl PackageArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(path.into(), bytes);
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.files.remove(path)
    }

    /// Mutable access to a file's bytes.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut Vec<u8>> {
        self.files.get_mut(path)
    }

    /// Archive paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Store every file under `prefix` in the object store.
    pub async fn save_to_store(&self, objects: &dyn ObjectStore, prefix: &str) -> Result<()> {
        for (path, bytes) in &self.files {
            objects.put(&format!("{}{}", prefix, path), bytes.clone()).await?;
        }
        Ok(())
    }

    /// Load every object below `prefix`.
    pub async fn load_from_store(objects: &dyn ObjectStore, prefix: &str) -> Result<Self> {
        let mut archive = Self::new();
        for key in objects.list(prefix).await? {
            let bytes = objects.get(&key).await?;
            if let Some(path) = key.strip_prefix(prefix) {
                archive.insert(path, bytes);
            }
        }
        if archive.is_empty() {
            return Err(WardenError::NotFound(format!("package {}", prefix)));
        }
        Ok(archive)
    }

    /// Write the archive below `dir`.
    pub async fn write_to_dir(&self, dir: &Path) -> Result<()> {
        for (path, bytes) in &self.files {
            validate_key(path)?;
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, bytes).await?;
        }
        Ok(())
    }

    /// Read every file below `dir`; paths use `/` separators.
    pub async fn read_from_dir(dir: &Path) -> Result<Self> {
        let mut archive = Self::new();
        let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(dir)
                    .map_err(|e| WardenError::Internal(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                archive.insert(relative, tokio::fs::read(&path).await?);
            }
        }

        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryObjectStore;

    #[tokio::test]
    async fn test_dir_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = PackageArchive::new();
        archive.insert("evidence/e1/shot.png", vec![1, 2, 3]);
        archive.insert("manifest.json", b"{}".to_vec());

        archive.write_to_dir(dir.path()).await.unwrap();
        let read = PackageArchive::read_from_dir(dir.path()).await.unwrap();
        assert_eq!(read, archive);
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let objects = MemoryObjectStore::new();
        let mut archive = PackageArchive::new();
        archive.insert("custody/e1.json", b"[]".to_vec());
        archive.insert("manifest.sig", b"sig".to_vec());

        archive.save_to_store(&objects, "packages/fam-1/p1/").await.unwrap();
        let loaded = PackageArchive::load_from_store(&objects, "packages/fam-1/p1/")
            .await
            .unwrap();
        assert_eq!(loaded, archive);
        assert!(PackageArchive::load_from_store(&objects, "packages/fam-1/p2/")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_write_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = PackageArchive::new();
        archive.insert("../outside", vec![0]);
        assert!(archive.write_to_dir(dir.path()).await.is_err());
    }
}
