//! Custody chain verification.

use super::CustodyEvent;
use serde::{Deserialize, Serialize};

/// Kind of chain defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainIssueKind {
    /// Stored hash does not match the event's fields.
    HashMismatch,
    /// `prev_hash` differs from the previous event's hash.
    BrokenLink,
    /// A non-genesis event has no `prev_hash`.
    MissingLink,
}

/// A single defect found while verifying a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIssue {
    /// Position of the offending event in the verified slice.
    pub index: usize,
    /// Sequence number recorded on the event.
    pub seq: u64,
    pub kind: ChainIssueKind,
    pub detail: String,
}

/// Result of verifying a chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub ok: bool,
    pub events_checked: usize,
    pub issues: Vec<ChainIssue>,
}

/// Verify a chronologically ordered chain.
///
/// Every event's hash is recomputed from its own fields and every link is compared against the
/// previous event's stored hash. All defects are reported; verification never stops early.
pub fn verify_chain(events: &[CustodyEvent]) -> ChainReport {
    let mut issues = Vec::new();

    for (index, event) in events.iter().enumerate() {
        let recomputed = event.compute_hash();
        if !crate::hash::digests_equal(&recomputed, &event.hash) {
            issues.push(ChainIssue {
                index,
                seq: event.seq,
                kind: ChainIssueKind::HashMismatch,
                detail: format!("stored {} but fields hash to {}", event.hash, recomputed),
            });
        }

        if index == 0 {
            continue;
        }

        let previous = &events[index - 1];
        match &event.prev_hash {
            None => issues.push(ChainIssue {
                index,
                seq: event.seq,
                kind: ChainIssueKind::MissingLink,
                detail: "non-genesis event without prev_hash".to_string(),
            }),
            Some(prev) if !crate::hash::digests_equal(prev, &previous.hash) => {
                issues.push(ChainIssue {
                    index,
                    seq: event.seq,
                    kind: ChainIssueKind::BrokenLink,
                    detail: format!("prev_hash {} but previous event hash is {}", prev, previous.hash),
                })
            }
            Some(_) => {}
        }
    }

    ChainReport {
        ok: issues.is_empty(),
        events_checked: events.len(),
        issues,
    }
}
