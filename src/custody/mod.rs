//! Append-only, hash-chained custody log.
//!
//! Every action taken on an evidence item is recorded as a [`CustodyEvent`]. Events for one item
//! form a chain: each stores the hash of its predecessor (`prev_hash`, `None` at genesis) and its
//! own hash over the canonical encoding of
//! `prev_hash ‖ actor ‖ action ‖ event_key ‖ payload ‖ created_at`.
//!
//! ```text
//!  seq 0 (CREATE)        seq 1 (VIEW)          seq 2 (HOLD)
//! ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ prev: null   │◄─────│ prev: h0     │◄─────│ prev: h1     │
//! │ hash: h0     │      │ hash: h1     │      │ hash: h2     │
//! └──────────────┘      └──────────────┘      └──────────────┘
//! ```
//!
//! The ledger is exempt from holds and purges and offers no update or delete operation.

mod ledger;
mod store;
mod verify;

pub use ledger::CustodyLedger;
pub use store::{CustodyStore, MemoryCustodyStore};
pub use verify::{verify_chain, ChainIssue, ChainIssueKind, ChainReport};

use crate::hash::CanonicalHasher;
use crate::types::EvidenceId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action recorded in the custody chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustodyAction {
    Create,
    View,
    Hold,
    Release,
    DeleteAttempt,
}

impl CustodyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustodyAction::Create => "CREATE",
            CustodyAction::View => "VIEW",
            CustodyAction::Hold => "HOLD",
            CustodyAction::Release => "RELEASE",
            CustodyAction::DeleteAttempt => "DELETE_ATTEMPT",
        }
    }
}

impl fmt::Display for CustodyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable custody record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyEvent {
    /// Evidence item this event belongs to.
    pub evidence_id: EvidenceId,
    /// Position in the item's chain, starting at 0.
    pub seq: u64,
    /// Who acted.
    pub actor: String,
    /// What was done.
    pub action: CustodyAction,
    /// Key identifying the triggering object (hold id, request id, package id...).
    pub event_key: String,
    /// Structured detail, opaque to the ledger.
    pub event_payload: serde_json::Value,
    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
    /// Hash of the previous event, `None` at genesis.
    pub prev_hash: Option<String>,
    /// Hash of this event.
    pub hash: String,
}

impl CustodyEvent {
    /// Recompute this event's hash from its own fields.
    pub fn compute_hash(&self) -> String {
        compute_event_hash(
            self.prev_hash.as_deref(),
            &self.actor,
            self.action,
            &self.event_key,
            &self.event_payload,
            &self.created_at,
        )
    }

    /// Whether the stored hash matches the fields.
    pub fn is_self_consistent(&self) -> bool {
        crate::hash::digests_equal(&self.hash, &self.compute_hash())
    }
}

/// Canonical custody event hash.
pub fn compute_event_hash(
    prev_hash: Option<&str>,
    actor: &str,
    action: CustodyAction,
    event_key: &str,
    payload: &serde_json::Value,
    created_at: &DateTime<Utc>,
) -> String {
    CanonicalHasher::new()
        .optional(prev_hash)
        .field(actor)
        .field(action.as_str())
        .field(event_key)
        .json(payload)
        .field(created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .finish_hex()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event() -> CustodyEvent {
        let created_at = crate::types::now();
        let payload = json!({"source": "intake"});
        let hash = compute_event_hash(None, "alice", CustodyAction::Create, "ev-1", &payload, &created_at);
        CustodyEvent {
            evidence_id: "ev-1".into(),
            seq: 0,
            actor: "alice".into(),
            action: CustodyAction::Create,
            event_key: "ev-1".into(),
            event_payload: payload,
            created_at,
            prev_hash: None,
            hash,
        }
    }

    #[test]
    fn test_event_is_self_consistent() {
        assert!(event().is_self_consistent());
    }

    #[test]
    fn test_every_hashed_field_matters() {
        let base = event();

        let mut e = base.clone();
        e.actor = "mallory".into();
        assert!(!e.is_self_consistent());

        let mut e = base.clone();
        e.action = CustodyAction::View;
        assert!(!e.is_self_consistent());

        let mut e = base.clone();
        e.event_payload = json!({"source": "intakf"});
        assert!(!e.is_self_consistent());

        let mut e = base.clone();
        e.created_at += chrono::Duration::microseconds(1);
        assert!(!e.is_self_consistent());

        let mut e = base;
        e.prev_hash = Some(String::new());
        assert!(!e.is_self_consistent());
    }

    #[test]
    fn test_action_wire_format() {
        assert_eq!(
            serde_json::to_string(&CustodyAction::DeleteAttempt).unwrap(),
            "\"DELETE_ATTEMPT\""
        );
    }

    #[test]
    fn test_event_survives_serialization() {
        let e = event();
        let decoded: CustodyEvent = serde_json::from_str(&serde_json::to_string(&e).unwrap()).unwrap();
        assert!(decoded.is_self_consistent());
        assert_eq!(decoded, e);
    }
}
