//! Custody event persistence.

use super::CustodyEvent;
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Append-only storage of custody chains, keyed by evidence id and sequence.
///
/// Stored events are never updated or removed.
#[async_trait]
pub trait CustodyStore: Send + Sync {
    /// Last event of a chain, if any.
    async fn tail(&self, evidence_id: &str) -> Result<Option<CustodyEvent>>;

    /// Insert `event` only if the chain's current tail hash equals `expected_tail`.
    ///
    /// A mismatch means another writer appended first; the insert fails with
    /// [`WardenError::Conflict`] and nothing is stored.
    async fn insert(&self, event: CustodyEvent, expected_tail: Option<&str>) -> Result<()>;

    /// Whole chain in sequence order.
    async fn list(&self, evidence_id: &str) -> Result<Vec<CustodyEvent>>;
}

/// In-memory custody store.
#[derive(Clone, Default)]
pub struct MemoryCustodyStore {
    chains: Arc<RwLock<HashMap<String, Vec<CustodyEvent>>>>,
}

impl MemoryCustodyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored event. Only for tamper-detection tests.
    #[cfg(test)]
    pub(crate) async fn tamper(&self, evidence_id: &str, seq: usize, f: impl FnOnce(&mut CustodyEvent)) {
        let mut chains = self.chains.write().await;
        if let Some(event) = chains.get_mut(evidence_id).and_then(|c| c.get_mut(seq)) {
            f(event);
        }
    }
}

#[async_trait]
impl CustodyStore for MemoryCustodyStore {
    async fn tail(&self, evidence_id: &str) -> Result<Option<CustodyEvent>> {
        Ok(self
            .chains
            .read()
            .await
            .get(evidence_id)
            .and_then(|chain| chain.last().cloned()))
    }

    async fn insert(&self, event: CustodyEvent, expected_tail: Option<&str>) -> Result<()> {
        let mut chains = self.chains.write().await;
        let chain = chains.entry(event.evidence_id.clone()).or_default();

        let current_tail = chain.last().map(|e| e.hash.as_str());
        if current_tail != expected_tail {
            return Err(WardenError::Conflict(format!(
                "custody chain for {} moved: expected tail {:?}, found {:?}",
                event.evidence_id, expected_tail, current_tail
            )));
        }
        if event.seq != chain.len() as u64 {
            return Err(WardenError::Conflict(format!(
                "custody chain for {} expects seq {}, got {}",
                event.evidence_id,
                chain.len(),
                event.seq
            )));
        }

        chain.push(event);
        Ok(())
    }

    async fn list(&self, evidence_id: &str) -> Result<Vec<CustodyEvent>> {
        Ok(self
            .chains
            .read()
            .await
            .get(evidence_id)
            .cloned()
            .unwrap_or_default())
    }
}
