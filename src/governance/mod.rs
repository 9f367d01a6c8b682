//! Governed deletion of evidence.
//!
//! Deletion is a three-step workflow: a request, an approval and an execution confirmed with a
//! step-up token. Executing only soft-deletes; the bytes are removed later by the purge worker
//! once retention has elapsed and no hold applies.
//!
//! ```text
//! PENDING ──approve──▶ APPROVED ──execute──▶ EXECUTED
//!    └────reject────▶ REJECTED
//! ```

use crate::auth::{role_allows, Actor, Permission, StepUpAuthenticator};
use crate::custody::{CustodyAction, CustodyLedger};
use crate::error::{Result, WardenError};
use crate::evidence::EvidenceStore;
use crate::policy::{DeleteMode, LegalHoldRegistry, PolicyStore};
use crate::types::{EvidenceId, FamilyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Status of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl DeleteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeleteStatus::Rejected | DeleteStatus::Executed)
    }
}

/// A request to delete one evidence item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub request_id: String,
    pub family_id: FamilyId,
    pub evidence_id: EvidenceId,
    pub reason: String,
    pub status: DeleteStatus,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub executed_by: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
}

/// Runs the delete request workflow.
pub struct DeletionGovernance {
    requests: RwLock<HashMap<String, DeleteRequest>>,
    /// Serializes executions so a request is executed at most once.
    executing: Mutex<()>,
    evidence: Arc<dyn EvidenceStore>,
    policies: PolicyStore,
    holds: Arc<LegalHoldRegistry>,
    ledger: Arc<CustodyLedger>,
    step_up: Arc<StepUpAuthenticator>,
}

impl DeletionGovernance {
    pub fn new(
        evidence: Arc<dyn EvidenceStore>,
        policies: PolicyStore,
        holds: Arc<LegalHoldRegistry>,
        ledger: Arc<CustodyLedger>,
        step_up: Arc<StepUpAuthenticator>,
    ) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            executing: Mutex::new(()),
            evidence,
            policies,
            holds,
            ledger,
            step_up,
        }
    }

    /// Open a request to delete `evidence_id`.
    ///
    /// In [`DeleteMode::Direct`] families a requester who may also approve gets an approved
    /// request straight away.
    pub async fn request_delete(
        &self,
        evidence_id: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<DeleteRequest> {
        let item = self.evidence.get(evidence_id).await?;
        actor.authorize(Permission::RequestDelete, &item.family_id)?;

        if reason.trim().is_empty() {
            return Err(WardenError::Validation("delete reason is required".to_string()));
        }
        if item.is_deleted() || item.is_purged() {
            return Err(WardenError::InvalidState(format!(
                "evidence {} is already deleted",
                evidence_id
            )));
        }

        let policy = self.policies.get_policy(&item.family_id).await;
        let now = crate::types::now();
        let auto_approve =
            policy.delete_mode == DeleteMode::Direct && role_allows(actor.role, Permission::ApproveDelete);

        let request = DeleteRequest {
            request_id: crate::types::new_id(),
            family_id: item.family_id.clone(),
            evidence_id: evidence_id.to_string(),
            reason: reason.to_string(),
            status: if auto_approve {
                DeleteStatus::Approved
            } else {
                DeleteStatus::Pending
            },
            requested_by: actor.id.clone(),
            created_at: now,
            decided_by: auto_approve.then(|| actor.id.clone()),
            decided_at: auto_approve.then_some(now),
            executed_by: None,
            executed_at: None,
        };

        self.requests
            .write()
            .await
            .insert(request.request_id.clone(), request.clone());

        info!(
            request_id = %request.request_id,
            evidence_id,
            requested_by = %actor.id,
            status = ?request.status,
            "Opened delete request"
        );

        Ok(request)
    }

    pub async fn get(&self, request_id: &str) -> Result<DeleteRequest> {
        self.requests
            .read()
            .await
            .get(request_id)
            .cloned()
            .ok_or_else(|| WardenError::NotFound(format!("delete request {}", request_id)))
    }

    /// Requests of a family, newest first.
    pub async fn list(&self, family_id: &str) -> Vec<DeleteRequest> {
        let mut found: Vec<DeleteRequest> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.family_id == family_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    pub async fn approve(&self, request_id: &str, actor: &Actor) -> Result<DeleteRequest> {
        self.decide(request_id, actor, DeleteStatus::Approved).await
    }

    pub async fn reject(&self, request_id: &str, actor: &Actor) -> Result<DeleteRequest> {
        self.decide(request_id, actor, DeleteStatus::Rejected).await
    }

    async fn decide(
        &self,
        request_id: &str,
        actor: &Actor,
        outcome: DeleteStatus,
    ) -> Result<DeleteRequest> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| WardenError::NotFound(format!("delete request {}", request_id)))?;

        actor.authorize(Permission::ApproveDelete, &request.family_id)?;

        if request.status != DeleteStatus::Pending {
            return Err(WardenError::InvalidState(format!(
                "delete request {} is {:?}, expected PENDING",
                request_id, request.status
            )));
        }

        request.status = outcome;
        request.decided_by = Some(actor.id.clone());
        request.decided_at = Some(crate::types::now());

        info!(
            request_id,
            decided_by = %actor.id,
            status = ?outcome,
            "Decided delete request"
        );

        Ok(request.clone())
    }

    /// Execute an approved request.
    ///
    /// A presented token is consumed before the hold check, so it is spent even when the
    /// execution is then refused.
    pub async fn execute(
        &self,
        request_id: &str,
        step_up_token: Option<&str>,
        actor: &Actor,
    ) -> Result<DeleteRequest> {
        let _executing = self.executing.lock().await;

        let request = self.get(request_id).await?;
        actor.authorize(Permission::ExecuteDelete, &request.family_id)?;

        if request.status != DeleteStatus::Approved {
            return Err(WardenError::InvalidState(format!(
                "delete request {} is {:?}, expected APPROVED",
                request_id, request.status
            )));
        }

        let item = self.evidence.get(&request.evidence_id).await?;
        if item.is_deleted() || item.is_purged() {
            return Err(WardenError::InvalidState(format!(
                "evidence {} is already deleted",
                item.evidence_id
            )));
        }

        let policy = self.policies.get_policy(&request.family_id).await;
        match step_up_token {
            Some(token) => self.step_up.consume(token, actor)?,
            None if policy.require_2fa_for_delete => return Err(WardenError::StepUpRequired),
            None => {}
        }

        let _frozen = self.holds.freeze_family(&item.family_id).await;
        if self.holds.is_held(&item).await {
            warn!(
                request_id,
                evidence_id = %item.evidence_id,
                "Delete refused: evidence under legal hold"
            );
            return Err(WardenError::PolicyViolation(format!(
                "evidence {} is under legal hold",
                item.evidence_id
            )));
        }

        let now = crate::types::now();
        self.evidence.mark_deleted(&item.evidence_id, now).await?;
        self.ledger
            .append(
                &item.evidence_id,
                &actor.id,
                CustodyAction::DeleteAttempt,
                request_id,
                json!({ "request_id": request_id, "reason": request.reason }),
            )
            .await?;

        let executed = {
            let mut requests = self.requests.write().await;
            let stored = requests
                .get_mut(request_id)
                .ok_or_else(|| WardenError::NotFound(format!("delete request {}", request_id)))?;
            stored.status = DeleteStatus::Executed;
            stored.executed_by = Some(actor.id.clone());
            stored.executed_at = Some(now);
            stored.clone()
        };

        info!(
            request_id,
            evidence_id = %item.evidence_id,
            executed_by = %actor.id,
            "Executed delete request"
        );

        Ok(executed)
    }
}
