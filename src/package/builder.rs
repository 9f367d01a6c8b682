//! Package builder.

use super::{ManifestEntry, PackageArchive, PackageManifest, SigningKeyring, MANIFEST_PATH, SIGNATURE_PATH};
use crate::auth::{Actor, Permission};
use crate::custody::{verify_chain, CustodyAction, CustodyLedger};
use crate::error::{Result, WardenError};
use crate::evidence::EvidenceStore;
use crate::object_store::ObjectStore;
use crate::types::{DeviceId, EvidenceItem, EvidenceKind, IncidentId};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Longest accepted free-text query.
pub const MAX_QUERY_LEN: usize = 256;

/// Selection criteria for an export. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceFilter {
    #[serde(rename = "type")]
    pub kind: Option<EvidenceKind>,
    pub device_id: Option<DeviceId>,
    pub incident_id: Option<IncidentId>,
    /// Earliest capture time, inclusive.
    pub from: Option<DateTime<Utc>>,
    /// Latest capture time, inclusive.
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring of summary, classification or evidence id.
    pub q: Option<String>,
}

impl EvidenceFilter {
    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(WardenError::Validation(format!(
                    "filter range is inverted: from {} is after to {}",
                    from, to
                )));
            }
        }
        if let Some(q) = &self.q {
            if q.chars().count() > MAX_QUERY_LEN {
                return Err(WardenError::Validation(format!(
                    "q must be at most {} characters",
                    MAX_QUERY_LEN
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, item: &EvidenceItem) -> bool {
        if self.kind.is_some_and(|kind| kind != item.kind) {
            return false;
        }
        if self.device_id.is_some() && self.device_id != item.device_id {
            return false;
        }
        if self.incident_id.is_some() && self.incident_id != item.incident_id {
            return false;
        }
        if self.from.is_some_and(|from| item.captured_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| item.captured_at > to) {
            return false;
        }
        if let Some(q) = self.q.as_deref().filter(|q| !q.is_empty()) {
            let needle = q.to_lowercase();
            let hit = [&item.summary, &item.classification, &item.evidence_id]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// An item left out of a package because its bytes could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub evidence_id: String,
    pub reason: String,
}

/// Outcome of a package build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageResult {
    pub package_id: String,
    /// Object store prefix holding the archive.
    pub storage_key: String,
    pub filename: String,
    /// Opaque handle an upstream download service resolves to the archive.
    pub download_handle: String,
    /// Base64 manifest signature.
    pub manifest_signature: String,
    /// Number of files listed in the manifest.
    pub file_count: usize,
    pub skipped: Vec<SkippedItem>,
}

/// Builds signed export packages.
pub struct PackageBuilder {
    objects: Arc<dyn ObjectStore>,
    evidence: Arc<dyn EvidenceStore>,
    ledger: Arc<CustodyLedger>,
    keyring: Arc<SigningKeyring>,
}

impl PackageBuilder {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        evidence: Arc<dyn EvidenceStore>,
        ledger: Arc<CustodyLedger>,
        keyring: Arc<SigningKeyring>,
    ) -> Self {
        Self {
            objects,
            evidence,
            ledger,
            keyring,
        }
    }

    /// Build, sign and store a package of the family's matching evidence.
    ///
    /// `progress` receives a percentage after each item. A digest mismatch or a broken custody
    /// chain aborts the build; unreadable objects are skipped and reported.
    pub async fn build(
        &self,
        family_id: &str,
        filter: &EvidenceFilter,
        actor: &Actor,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<PackageResult> {
        actor.authorize(Permission::ExportPackage, family_id)?;
        filter.validate()?;

        let selected: Vec<EvidenceItem> = self
            .evidence
            .list_family(family_id)
            .await?
            .into_iter()
            .filter(|item| !item.is_deleted() && !item.is_purged() && filter.matches(item))
            .collect();

        let package_id = crate::types::new_id();
        let mut archive = PackageArchive::new();
        let mut exported = Vec::new();
        let mut skipped = Vec::new();

        for (index, item) in selected.iter().enumerate() {
            match self.objects.get(&item.storage_key).await {
                Ok(bytes) => {
                    let actual = crate::hash::sha256_hex(&bytes);
                    if !crate::hash::digests_equal(&actual, &item.sha256_hex) {
                        warn!(
                            package_id = %package_id,
                            evidence_id = %item.evidence_id,
                            "Digest mismatch while exporting"
                        );
                        return Err(WardenError::DigestMismatch {
                            subject: item.evidence_id.clone(),
                            expected: item.sha256_hex.clone(),
                            actual,
                        });
                    }

                    archive.insert(
                        format!("evidence/{}/{}", item.evidence_id, item.file_name()),
                        bytes,
                    );
                    let chain = self.ledger.list_chain(&item.evidence_id).await?;
                    let report = verify_chain(&chain);
                    if !report.ok {
                        warn!(
                            package_id = %package_id,
                            evidence_id = %item.evidence_id,
                            issues = report.issues.len(),
                            "Broken custody chain while exporting"
                        );
                        return Err(WardenError::Integrity(format!(
                            "custody chain of {} has {} defect(s)",
                            item.evidence_id,
                            report.issues.len()
                        )));
                    }
                    archive.insert(
                        format!("custody/{}.json", item.evidence_id),
                        serde_json::to_vec_pretty(&chain)?,
                    );
                    exported.push(item.evidence_id.clone());
                }
                Err(e) => {
                    warn!(
                        package_id = %package_id,
                        evidence_id = %item.evidence_id,
                        error = %e,
                        "Skipping unreadable evidence"
                    );
                    skipped.push(SkippedItem {
                        evidence_id: item.evidence_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            progress(((index + 1) * 90 / selected.len()) as u8);
        }

        let signing_key = self.keyring.active();
        let entries = archive
            .paths()
            .map(|path| ManifestEntry {
                path: path.to_string(),
                sha256_hex: crate::hash::sha256_hex(archive.get(path).unwrap_or_default()),
            })
            .collect();
        let manifest = PackageManifest::new(entries)
            .with_package(&package_id, family_id)
            .with_key_id(signing_key.key_id());
        let file_count = manifest.files.len();

        let manifest_bytes = manifest.to_bytes()?;
        let signature = STANDARD.encode(signing_key.sign(&manifest_bytes));
        archive.insert(MANIFEST_PATH, manifest_bytes);
        archive.insert(SIGNATURE_PATH, signature.clone().into_bytes());

        let storage_key = format!("packages/{}/{}/", family_id, package_id);
        archive.save_to_store(self.objects.as_ref(), &storage_key).await?;

        for evidence_id in &exported {
            self.ledger
                .append(
                    evidence_id,
                    &actor.id,
                    CustodyAction::View,
                    &package_id,
                    json!({ "via": "package_export", "package_id": package_id }),
                )
                .await?;
        }

        counter!("warden_packages_built_total").increment(1);
        info!(
            package_id = %package_id,
            family_id,
            exported = exported.len(),
            skipped = skipped.len(),
            key_id = signing_key.key_id(),
            "Built evidence package"
        );
        progress(100);

        Ok(PackageResult {
            download_handle: format!("packages/{}/{}", family_id, package_id),
            filename: format!("evidence-package-{}", package_id),
            package_id,
            storage_key,
            manifest_signature: signature,
            file_count,
            skipped,
        })
    }
}
