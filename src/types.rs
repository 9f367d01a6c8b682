//! Core type definitions for Warden.
//!
//! Identifiers are plain strings (UUIDs for ids Warden mints itself, upstream-supplied values
//! otherwise) aliased for readability. Timestamps are UTC and truncated to microseconds so the
//! value that is stored is exactly the value that is hashed.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an evidence item.
pub type EvidenceId = String;

/// Identifier of a family (the tenant boundary).
pub type FamilyId = String;

/// Identifier of an incident grouping several evidence items.
pub type IncidentId = String;

/// Identifier of a monitored device.
pub type DeviceId = String;

/// Current time truncated to microsecond precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Mint a new random identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whole days elapsed between `from` and `to` (zero if `to` is earlier).
pub fn age_days(to: DateTime<Utc>, from: DateTime<Utc>) -> i64 {
    (to - from).num_days().max(0)
}

/// What kind of capture an evidence item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceKind {
    Alert,
    Screenshot,
    Conversation,
    Other,
}

/// Severity assigned upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// A preserved piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Unique evidence ID.
    pub evidence_id: EvidenceId,
    /// Owning family.
    pub family_id: FamilyId,
    /// Incident this item belongs to, if any.
    pub incident_id: Option<IncidentId>,
    /// Device that captured it.
    pub device_id: Option<DeviceId>,
    /// Capture kind.
    pub kind: EvidenceKind,
    /// Key of the bytes in the object store.
    pub storage_key: String,
    /// MIME type of the stored bytes.
    pub content_type: String,
    /// When the evidence was captured. Retention is measured from here.
    pub captured_at: DateTime<Utc>,
    /// SHA-256 of the stored bytes, lowercase hex.
    pub sha256_hex: String,
    /// Upstream classification label.
    pub classification: String,
    /// Upstream severity.
    pub severity: Severity,
    /// Free-text summary.
    pub summary: String,
    /// Soft-deletion time.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Permanent purge time. Implies `deleted_at`.
    pub purged_at: Option<DateTime<Utc>>,
}

impl EvidenceItem {
    /// Whether the item was soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the item's bytes are gone for good.
    pub fn is_purged(&self) -> bool {
        self.purged_at.is_some()
    }

    /// Waiting for the purge worker.
    pub fn is_purge_candidate(&self) -> bool {
        self.deleted_at.is_some() && self.purged_at.is_none()
    }

    /// File name used inside export packages.
    pub fn file_name(&self) -> &str {
        self.storage_key
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.evidence_id)
    }
}

/// Minimal item for unit tests.
#[cfg(test)]
pub(crate) fn test_item(evidence_id: &str, family_id: &str, incident_id: Option<&str>) -> EvidenceItem {
    EvidenceItem {
        evidence_id: evidence_id.to_string(),
        family_id: family_id.to_string(),
        incident_id: incident_id.map(str::to_string),
        device_id: None,
        kind: EvidenceKind::Alert,
        storage_key: format!("evidence/{}/{}/alert.json", family_id, evidence_id),
        content_type: "application/json".to_string(),
        captured_at: now(),
        sha256_hex: crate::hash::sha256_hex(evidence_id.as_bytes()),
        classification: "bullying".to_string(),
        severity: Severity::Medium,
        summary: String::new(),
        deleted_at: None,
        purged_at: None,
    }
}
