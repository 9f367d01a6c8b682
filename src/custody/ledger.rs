//! Custody ledger: serialized appends per evidence item.

use super::{compute_event_hash, verify_chain, ChainReport, CustodyAction, CustodyEvent, CustodyStore};
use crate::error::Result;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Writes and reads custody chains.
///
/// Appends for the same evidence item are serialized by a per-item async mutex and additionally
/// guarded by the store's optimistic tail check. Appends for different items run in parallel.
pub struct CustodyLedger {
    store: Arc<dyn CustodyStore>,
    writers: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CustodyLedger {
    pub fn new(store: Arc<dyn CustodyStore>) -> Self {
        Self {
            store,
            writers: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn writer_lock(&self, evidence_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.writers
            .lock()
            .entry(evidence_id.to_string())
            .or_default()
            .clone()
    }

    fn release_writer_lock(&self, evidence_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut writers = self.writers.lock();
        // Map + this handle: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            writers.remove(evidence_id);
        }
    }

    /// Append an event to an item's chain.
    pub async fn append(
        &self,
        evidence_id: &str,
        actor: &str,
        action: CustodyAction,
        event_key: &str,
        payload: serde_json::Value,
    ) -> Result<CustodyEvent> {
        let lock = self.writer_lock(evidence_id);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(evidence_id, actor, action, event_key, payload)
                .await
        };
        self.release_writer_lock(evidence_id, lock);
        result
    }

    async fn append_locked(
        &self,
        evidence_id: &str,
        actor: &str,
        action: CustodyAction,
        event_key: &str,
        payload: serde_json::Value,
    ) -> Result<CustodyEvent> {
        let tail = self.store.tail(evidence_id).await?;
        let (seq, prev_hash) = match &tail {
            Some(t) => (t.seq + 1, Some(t.hash.clone())),
            None => (0, None),
        };

        let created_at = crate::types::now();
        let hash = compute_event_hash(
            prev_hash.as_deref(),
            actor,
            action,
            event_key,
            &payload,
            &created_at,
        );

        let event = CustodyEvent {
            evidence_id: evidence_id.to_string(),
            seq,
            actor: actor.to_string(),
            action,
            event_key: event_key.to_string(),
            event_payload: payload,
            created_at,
            prev_hash: prev_hash.clone(),
            hash,
        };

        self.store.insert(event.clone(), prev_hash.as_deref()).await?;

        counter!("warden_custody_events_total", "action" => action.as_str()).increment(1);
        debug!(
            evidence_id,
            seq,
            action = %action,
            actor,
            "Appended custody event"
        );

        Ok(event)
    }

    /// Chronological chain of an item.
    pub async fn list_chain(&self, evidence_id: &str) -> Result<Vec<CustodyEvent>> {
        self.store.list(evidence_id).await
    }

    /// Load and verify an item's chain.
    pub async fn verify_evidence(&self, evidence_id: &str) -> Result<ChainReport> {
        let events = self.list_chain(evidence_id).await?;
        Ok(verify_chain(&events))
    }
}
