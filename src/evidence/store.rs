//! Evidence item repository.

use crate::error::{Result, WardenError};
use crate::types::{EvidenceItem, FamilyId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence for evidence metadata.
///
/// Bytes live in the object store; this repository only holds [`EvidenceItem`] rows.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Insert a new item. Fails with [`WardenError::Conflict`] if the id exists.
    async fn insert(&self, item: EvidenceItem) -> Result<()>;

    /// Fetch an item. Fails with [`WardenError::NotFound`].
    async fn get(&self, evidence_id: &str) -> Result<EvidenceItem>;

    /// All items of a family, ordered by capture time then id.
    async fn list_family(&self, family_id: &str) -> Result<Vec<EvidenceItem>>;

    /// Families that own at least one item.
    async fn families(&self) -> Result<Vec<FamilyId>>;

    /// Set `deleted_at` if not already set, returning the updated item.
    async fn mark_deleted(&self, evidence_id: &str, at: DateTime<Utc>) -> Result<EvidenceItem>;

    /// Set `purged_at`. The item must be soft-deleted and not yet purged.
    async fn mark_purged(&self, evidence_id: &str, at: DateTime<Utc>) -> Result<EvidenceItem>;

    /// Soft-deleted, unpurged items of a family ordered by `(deleted_at, evidence_id)`.
    async fn purge_candidates(&self, family_id: &str) -> Result<Vec<EvidenceItem>>;
}

/// In-memory evidence repository.
#[derive(Clone, Default)]
pub struct MemoryEvidenceStore {
    items: Arc<RwLock<BTreeMap<String, EvidenceItem>>>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn insert(&self, item: EvidenceItem) -> Result<()> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.evidence_id) {
            return Err(WardenError::Conflict(format!(
                "evidence {} already recorded",
                item.evidence_id
            )));
        }
        items.insert(item.evidence_id.clone(), item);
        Ok(())
    }

    async fn get(&self, evidence_id: &str) -> Result<EvidenceItem> {
        self.items
            .read()
            .await
            .get(evidence_id)
            .cloned()
            .ok_or_else(|| WardenError::NotFound(format!("evidence {}", evidence_id)))
    }

    async fn list_family(&self, family_id: &str) -> Result<Vec<EvidenceItem>> {
        let mut found: Vec<EvidenceItem> = self
            .items
            .read()
            .await
            .values()
            .filter(|item| item.family_id == family_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then_with(|| a.evidence_id.cmp(&b.evidence_id))
        });
        Ok(found)
    }

    async fn families(&self) -> Result<Vec<FamilyId>> {
        let families: BTreeSet<FamilyId> = self
            .items
            .read()
            .await
            .values()
            .map(|item| item.family_id.clone())
            .collect();
        Ok(families.into_iter().collect())
    }

    async fn mark_deleted(&self, evidence_id: &str, at: DateTime<Utc>) -> Result<EvidenceItem> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(evidence_id)
            .ok_or_else(|| WardenError::NotFound(format!("evidence {}", evidence_id)))?;
        if item.deleted_at.is_none() {
            item.deleted_at = Some(at);
        }
        Ok(item.clone())
    }

    async fn mark_purged(&self, evidence_id: &str, at: DateTime<Utc>) -> Result<EvidenceItem> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(evidence_id)
            .ok_or_else(|| WardenError::NotFound(format!("evidence {}", evidence_id)))?;
        if !item.is_purge_candidate() {
            return Err(WardenError::InvalidState(format!(
                "evidence {} is not awaiting purge",
                evidence_id
            )));
        }
        item.purged_at = Some(at);
        Ok(item.clone())
    }

    async fn purge_candidates(&self, family_id: &str) -> Result<Vec<EvidenceItem>> {
        let mut candidates: Vec<EvidenceItem> = self
            .items
            .read()
            .await
            .values()
            .filter(|item| item.family_id == family_id && item.is_purge_candidate())
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            a.deleted_at
                .cmp(&b.deleted_at)
                .then_with(|| a.evidence_id.cmp(&b.evidence_id))
        });
        Ok(candidates)
    }
}
