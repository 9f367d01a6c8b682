//! Package manifest.

use crate::error::Result;
use crate::hash::HASH_ALGO;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signature algorithm of package manifests.
pub const SIGNATURE_ALGO: &str = "Ed25519";

/// One file covered by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256_hex: String,
}

/// List of every file in a package with its digest.
///
/// The signature covers the exact serialized bytes, so the manifest is serialized once and
/// those bytes are both signed and written to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub hash_algo: String,
    pub signature_algo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    /// Id of the signing key, for picking the right public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Sorted by path.
    pub files: Vec<ManifestEntry>,
}

impl PackageManifest {
    /// Manifest over `files`, sorted by path.
    pub fn new(mut files: Vec<ManifestEntry>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            hash_algo: HASH_ALGO.to_string(),
            signature_algo: SIGNATURE_ALGO.to_string(),
            package_id: None,
            family_id: None,
            generated_at: None,
            key_id: None,
            files,
        }
    }

    pub fn with_package(mut self, package_id: &str, family_id: &str) -> Self {
        self.package_id = Some(package_id.to_string());
        self.family_id = Some(family_id.to_string());
        self.generated_at = Some(crate::types::now());
        self
    }

    pub fn with_key_id(mut self, key_id: &str) -> Self {
        self.key_id = Some(key_id.to_string());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
