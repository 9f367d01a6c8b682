//! Evidence intake and access.
//!
//! Whether something is evidence is decided upstream. [`EvidenceService::ingest`] records what it
//! is given: bytes go to the object store, the digest and metadata to the [`EvidenceStore`], and a
//! `CREATE` event starts the item's custody chain. Every read through [`EvidenceService::view`]
//! re-checks the digest and is itself recorded.

mod store;

pub use store::{EvidenceStore, MemoryEvidenceStore};

use crate::auth::{Actor, Permission};
use crate::custody::{ChainReport, CustodyAction, CustodyEvent, CustodyLedger};
use crate::error::{Result, WardenError};
use crate::object_store::{validate_key, ObjectStore};
use crate::policy::LegalHoldRegistry;
use crate::types::{DeviceId, EvidenceItem, EvidenceKind, FamilyId, IncidentId, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// An evidence item as submitted by the capture pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvidence {
    pub family_id: FamilyId,
    pub incident_id: Option<IncidentId>,
    pub device_id: Option<DeviceId>,
    pub kind: EvidenceKind,
    /// Name the bytes are stored and exported under.
    pub file_name: String,
    pub content_type: String,
    /// Capture time; defaults to the time of intake.
    pub captured_at: Option<DateTime<Utc>>,
    pub classification: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Custody chain of an item with its verification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyView {
    pub events: Vec<CustodyEvent>,
    pub report: ChainReport,
}

/// Records and serves evidence.
pub struct EvidenceService {
    objects: Arc<dyn ObjectStore>,
    store: Arc<dyn EvidenceStore>,
    ledger: Arc<CustodyLedger>,
    holds: Arc<LegalHoldRegistry>,
}

impl EvidenceService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        store: Arc<dyn EvidenceStore>,
        ledger: Arc<CustodyLedger>,
        holds: Arc<LegalHoldRegistry>,
    ) -> Self {
        Self {
            objects,
            store,
            ledger,
            holds,
        }
    }

    /// Record a new item and start its custody chain.
    pub async fn ingest(&self, new: NewEvidence, actor: &Actor) -> Result<EvidenceItem> {
        actor.authorize(Permission::RecordEvidence, &new.family_id)?;
        validate_key(&new.file_name)?;
        if new.file_name.contains('/') {
            return Err(WardenError::Validation(format!(
                "file name must not contain '/': {}",
                new.file_name
            )));
        }

        let evidence_id = crate::types::new_id();
        let storage_key = format!("evidence/{}/{}/{}", new.family_id, evidence_id, new.file_name);
        let sha256_hex = crate::hash::sha256_hex(&new.bytes);

        self.objects.put(&storage_key, new.bytes).await?;

        let item = EvidenceItem {
            evidence_id: evidence_id.clone(),
            family_id: new.family_id,
            incident_id: new.incident_id,
            device_id: new.device_id,
            kind: new.kind,
            storage_key,
            content_type: new.content_type,
            captured_at: new.captured_at.unwrap_or_else(crate::types::now),
            sha256_hex,
            classification: new.classification,
            severity: new.severity,
            summary: new.summary,
            deleted_at: None,
            purged_at: None,
        };
        self.store.insert(item.clone()).await?;

        self.ledger
            .append(
                &evidence_id,
                &actor.id,
                CustodyAction::Create,
                &evidence_id,
                json!({
                    "sha256_hex": item.sha256_hex,
                    "storage_key": item.storage_key,
                    "classification": item.classification,
                }),
            )
            .await?;

        info!(
            evidence_id = %evidence_id,
            family_id = %item.family_id,
            kind = ?item.kind,
            severity = ?item.severity,
            "Recorded evidence"
        );

        if let Some(hold) = self.holds.auto_hold_if_needed(&item, &actor.id).await? {
            info!(evidence_id = %evidence_id, hold_id = %hold.hold_id, "Placed automatic legal hold");
        }

        Ok(item)
    }

    /// Metadata of an item.
    pub async fn get(&self, evidence_id: &str, actor: &Actor) -> Result<EvidenceItem> {
        let item = self.store.get(evidence_id).await?;
        actor.authorize(Permission::ViewEvidence, &item.family_id)?;
        Ok(item)
    }

    /// Read an item's bytes, verifying them against the recorded digest.
    ///
    /// A digest mismatch is reported as an integrity error and never corrected.
    pub async fn view(&self, evidence_id: &str, actor: &Actor) -> Result<(EvidenceItem, Vec<u8>)> {
        let item = self.get(evidence_id, actor).await?;
        if item.is_deleted() {
            return Err(WardenError::NotFound(format!("evidence {} was deleted", evidence_id)));
        }

        let bytes = self.objects.get(&item.storage_key).await?;
        let actual = crate::hash::sha256_hex(&bytes);
        if !crate::hash::digests_equal(&actual, &item.sha256_hex) {
            warn!(evidence_id, expected = %item.sha256_hex, actual = %actual, "Evidence digest mismatch");
            return Err(WardenError::DigestMismatch {
                subject: evidence_id.to_string(),
                expected: item.sha256_hex.clone(),
                actual,
            });
        }

        self.ledger
            .append(evidence_id, &actor.id, CustodyAction::View, evidence_id, json!({"via": "direct"}))
            .await?;

        Ok((item, bytes))
    }

    /// Custody chain of an item together with its verification report.
    pub async fn custody(&self, evidence_id: &str, actor: &Actor) -> Result<CustodyView> {
        self.get(evidence_id, actor).await?;
        let events = self.ledger.list_chain(evidence_id).await?;
        let report = crate::custody::verify_chain(&events);
        Ok(CustodyView { events, report })
    }
}
