// Legal hold registry

use super::PolicyStore;
use crate::auth::{Actor, Permission};
use crate::custody::{CustodyAction, CustodyLedger};
use crate::error::{Result, WardenError};
use crate::evidence::EvidenceStore;
use crate::types::{EvidenceItem, FamilyId, IncidentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

/// Legal hold on a family or one of its incidents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalHold {
    /// Unique hold ID
    pub hold_id: String,
    pub family_id: FamilyId,
    /// Held incident; `None` holds the whole family
    pub incident_id: Option<IncidentId>,
    pub reason: String,
    /// Who placed the hold
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// When the hold was released (if released)
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,
    /// Who released the hold
    pub released_by: Option<String>,
}

impl LegalHold {
    /// Checks if hold is currently active
    pub fn is_active(&self) -> bool {
        self.released_at.is_none()
    }

    /// Whether this hold, if active, protects `item`.
    pub fn covers(&self, item: &EvidenceItem) -> bool {
        self.family_id == item.family_id
            && match &self.incident_id {
                None => true,
                Some(incident) => item.incident_id.as_deref() == Some(incident.as_str()),
            }
    }
}

/// Legal hold registry
///
/// Released holds are kept forever so the hold history of a family stays auditable.
pub struct LegalHoldRegistry {
    holds: Arc<RwLock<HashMap<String, LegalHold>>>,
    /// Per-family guard; new holds wait while a purge holds it.
    family_locks: parking_lot::Mutex<HashMap<FamilyId, Arc<Mutex<()>>>>,
    policies: PolicyStore,
    evidence: Arc<dyn EvidenceStore>,
    ledger: Arc<CustodyLedger>,
}

impl LegalHoldRegistry {
    pub fn new(
        policies: PolicyStore,
        evidence: Arc<dyn EvidenceStore>,
        ledger: Arc<CustodyLedger>,
    ) -> Self {
        Self {
            holds: Arc::new(RwLock::new(HashMap::new())),
            family_locks: parking_lot::Mutex::new(HashMap::new()),
            policies,
            evidence,
            ledger,
        }
    }

    /// Block new holds in `family_id` until the guard is dropped.
    ///
    /// Callers that act on an `is_held` answer take this first so no hold can land in between.
    pub async fn freeze_family(&self, family_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .family_locks
            .lock()
            .entry(family_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Creates a new legal hold
    pub async fn create_hold(
        &self,
        family_id: &str,
        incident_id: Option<&str>,
        reason: &str,
        actor: &Actor,
    ) -> Result<LegalHold> {
        actor.authorize(Permission::PlaceHold, family_id)?;
        self.place(family_id, incident_id, reason, &actor.id).await
    }

    async fn place(
        &self,
        family_id: &str,
        incident_id: Option<&str>,
        reason: &str,
        created_by: &str,
    ) -> Result<LegalHold> {
        if reason.trim().is_empty() {
            return Err(WardenError::Validation("hold reason is required".to_string()));
        }
        if !self.policies.get_policy(family_id).await.legal_hold_enabled {
            return Err(WardenError::PolicyViolation(format!(
                "legal holds are disabled for family {}",
                family_id
            )));
        }

        let _frozen = self.freeze_family(family_id).await;
        let hold = LegalHold {
            hold_id: crate::types::new_id(),
            family_id: family_id.to_string(),
            incident_id: incident_id.map(str::to_string),
            reason: reason.to_string(),
            created_by: created_by.to_string(),
            created_at: crate::types::now(),
            released_at: None,
            release_reason: None,
            released_by: None,
        };

        self.holds
            .write()
            .await
            .insert(hold.hold_id.clone(), hold.clone());

        info!(
            hold_id = %hold.hold_id,
            family_id,
            incident_id = ?incident_id,
            placed_by = created_by,
            "Created legal hold"
        );

        let payload = json!({ "hold_id": hold.hold_id, "reason": hold.reason });
        self.record_on_covered(&hold, created_by, CustodyAction::Hold, payload)
            .await?;

        Ok(hold)
    }

    /// Releases a hold
    pub async fn release_hold(&self, hold_id: &str, reason: &str, actor: &Actor) -> Result<LegalHold> {
        let released = {
            let mut holds = self.holds.write().await;
            let hold = holds
                .get_mut(hold_id)
                .ok_or_else(|| WardenError::NotFound(format!("Legal hold {}", hold_id)))?;

            actor.authorize(Permission::ReleaseHold, &hold.family_id)?;

            if !hold.is_active() {
                return Err(WardenError::InvalidState(format!(
                    "Legal hold {} is already released",
                    hold_id
                )));
            }

            hold.released_at = Some(crate::types::now());
            hold.release_reason = Some(reason.to_string());
            hold.released_by = Some(actor.id.clone());
            hold.clone()
        };

        info!(
            hold_id = %hold_id,
            released_by = %actor.id,
            reason,
            "Released legal hold"
        );

        let payload = json!({ "hold_id": hold_id, "reason": reason });
        self.record_on_covered(&released, &actor.id, CustodyAction::Release, payload)
            .await?;

        Ok(released)
    }

    async fn record_on_covered(
        &self,
        hold: &LegalHold,
        actor: &str,
        action: CustodyAction,
        payload: serde_json::Value,
    ) -> Result<()> {
        let items = self.evidence.list_family(&hold.family_id).await?;
        for item in items.iter().filter(|i| hold.covers(i) && !i.is_purged()) {
            self.ledger
                .append(&item.evidence_id, actor, action, &hold.hold_id, payload.clone())
                .await?;
        }
        Ok(())
    }

    /// Gets a hold by ID
    pub async fn get_hold(&self, hold_id: &str) -> Option<LegalHold> {
        self.holds.read().await.get(hold_id).cloned()
    }

    /// Holds of a family, oldest first
    pub async fn list_holds(&self, family_id: &str, include_released: bool) -> Vec<LegalHold> {
        let mut holds: Vec<LegalHold> = self
            .holds
            .read()
            .await
            .values()
            .filter(|h| h.family_id == family_id && (include_released || h.is_active()))
            .cloned()
            .collect();
        holds.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.hold_id.cmp(&b.hold_id)));
        holds
    }

    /// Whether any active hold protects `item`.
    pub async fn is_held(&self, item: &EvidenceItem) -> bool {
        let held = self
            .holds
            .read()
            .await
            .values()
            .any(|h| h.is_active() && h.covers(item));
        debug!(evidence_id = %item.evidence_id, held, "Checked legal hold");
        held
    }

    async fn incident_held(&self, family_id: &str, incident_id: &str) -> bool {
        self.holds.read().await.values().any(|h| {
            h.is_active() && h.family_id == family_id && h.incident_id.as_deref() == Some(incident_id)
        })
    }

    /// Place an incident hold when a newly recorded item is severe enough.
    ///
    /// Returns the new hold, or `None` when the family disables holds, the item is below the
    /// threshold or has no incident, or its incident already has an active hold. A family-wide
    /// hold does not count, since it may be released before the incident is settled.
    pub async fn auto_hold_if_needed(
        &self,
        item: &EvidenceItem,
        actor: &str,
    ) -> Result<Option<LegalHold>> {
        let policy = self.policies.get_policy(&item.family_id).await;
        let Some(incident_id) = item.incident_id.as_deref() else {
            return Ok(None);
        };
        if !policy.legal_hold_enabled
            || item.severity < policy.auto_legal_hold_severity
            || self.incident_held(&item.family_id, incident_id).await
        {
            return Ok(None);
        }

        let reason = format!("automatic hold: {:?} severity incident", item.severity);
        let hold = self
            .place(&item.family_id, Some(incident_id), &reason, actor)
            .await?;
        Ok(Some(hold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::custody::MemoryCustodyStore;
    use crate::evidence::MemoryEvidenceStore;
    use crate::policy::PolicyUpdate;
    use crate::types::{test_item, Severity};

    struct Fixture {
        registry: LegalHoldRegistry,
        policies: PolicyStore,
        evidence: MemoryEvidenceStore,
        ledger: Arc<CustodyLedger>,
    }

    fn fixture() -> Fixture {
        let policies = PolicyStore::new();
        let evidence = MemoryEvidenceStore::new();
        let ledger = Arc::new(CustodyLedger::new(Arc::new(MemoryCustodyStore::new())));
        let registry = LegalHoldRegistry::new(policies.clone(), Arc::new(evidence.clone()), ledger.clone());
        Fixture {
            registry,
            policies,
            evidence,
            ledger,
        }
    }

    fn counsel() -> Actor {
        Actor::new("counsel-1", Role::LegalOfficer, "fam-1")
    }

    #[tokio::test]
    async fn test_create_and_release_round_trip() {
        let f = fixture();
        let item = test_item("ev-1", "fam-1", Some("inc-1"));
        f.evidence.insert(item.clone()).await.unwrap();

        assert!(!f.registry.is_held(&item).await);
        let hold = f
            .registry
            .create_hold("fam-1", Some("inc-1"), "litigation", &counsel())
            .await
            .unwrap();
        assert!(f.registry.is_held(&item).await);
        assert!(f.registry.is_held(&item).await);

        f.registry
            .release_hold(&hold.hold_id, "case closed", &counsel())
            .await
            .unwrap();
        assert!(!f.registry.is_held(&item).await);

        let chain = f.ledger.list_chain("ev-1").await.unwrap();
        let actions: Vec<_> = chain.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![CustodyAction::Hold, CustodyAction::Release]);
        assert_eq!(chain[0].event_key, hold.hold_id);

        // Released holds are kept.
        assert!(f.registry.list_holds("fam-1", false).await.is_empty());
        let all = f.registry.list_holds("fam-1", true).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].released_by.as_deref(), Some("counsel-1"));
    }

    #[tokio::test]
    async fn test_incident_scope_and_family_wide() {
        let f = fixture();
        let in_incident = test_item("ev-1", "fam-1", Some("inc-1"));
        let other_incident = test_item("ev-2", "fam-1", Some("inc-2"));
        let other_family = test_item("ev-3", "fam-2", Some("inc-1"));

        f.registry
            .create_hold("fam-1", Some("inc-1"), "incident", &counsel())
            .await
            .unwrap();
        assert!(f.registry.is_held(&in_incident).await);
        assert!(!f.registry.is_held(&other_incident).await);
        assert!(!f.registry.is_held(&other_family).await);

        f.registry
            .create_hold("fam-1", None, "everything", &counsel())
            .await
            .unwrap();
        assert!(f.registry.is_held(&other_incident).await);
        assert!(!f.registry.is_held(&other_family).await);
    }

    #[tokio::test]
    async fn test_double_release_is_invalid_state() {
        let f = fixture();
        let hold = f
            .registry
            .create_hold("fam-1", None, "audit", &counsel())
            .await
            .unwrap();
        f.registry.release_hold(&hold.hold_id, "done", &counsel()).await.unwrap();
        assert!(matches!(
            f.registry.release_hold(&hold.hold_id, "again", &counsel()).await,
            Err(WardenError::InvalidState(_))
        ));
        assert!(matches!(
            f.registry.release_hold("missing", "x", &counsel()).await,
            Err(WardenError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_holds_and_validation() {
        let f = fixture();
        let guardian = Actor::new("parent-1", Role::Guardian, "fam-1");

        assert!(matches!(
            f.registry.create_hold("fam-1", None, "  ", &counsel()).await,
            Err(WardenError::Validation(_))
        ));

        let update = PolicyUpdate {
            legal_hold_enabled: Some(false),
            ..Default::default()
        };
        f.policies.set_policy("fam-1", update, &guardian).await.unwrap();
        assert!(matches!(
            f.registry.create_hold("fam-1", None, "audit", &counsel()).await,
            Err(WardenError::PolicyViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_guardian_cannot_release() {
        let f = fixture();
        let guardian = Actor::new("parent-1", Role::Guardian, "fam-1");
        let hold = f
            .registry
            .create_hold("fam-1", None, "keep", &guardian)
            .await
            .unwrap();
        assert!(matches!(
            f.registry.release_hold(&hold.hold_id, "mine", &guardian).await,
            Err(WardenError::Forbidden(_))
        ));
        assert!(f.registry.get_hold(&hold.hold_id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_auto_hold_threshold() {
        let f = fixture();

        let mut critical = test_item("ev-1", "fam-1", Some("inc-1"));
        critical.severity = Severity::Critical;
        let hold = f.registry.auto_hold_if_needed(&critical, "system").await.unwrap();
        assert!(hold.is_some());
        assert_eq!(hold.unwrap().incident_id.as_deref(), Some("inc-1"));

        // Already held: no second hold.
        assert!(f.registry.auto_hold_if_needed(&critical, "system").await.unwrap().is_none());

        let mut high = test_item("ev-2", "fam-1", Some("inc-2"));
        high.severity = Severity::High;
        assert!(f.registry.auto_hold_if_needed(&high, "system").await.unwrap().is_none());

        let mut no_incident = test_item("ev-3", "fam-1", None);
        no_incident.severity = Severity::Critical;
        assert!(f.registry.auto_hold_if_needed(&no_incident, "system").await.unwrap().is_none());

        assert_eq!(f.registry.list_holds("fam-1", true).await.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_hold_survives_family_hold_release() {
        let f = fixture();
        let family_hold = f
            .registry
            .create_hold("fam-1", None, "audit", &counsel())
            .await
            .unwrap();

        let mut critical = test_item("ev-1", "fam-1", Some("inc-1"));
        critical.severity = Severity::Critical;
        f.evidence.insert(critical.clone()).await.unwrap();
        let hold = f.registry.auto_hold_if_needed(&critical, "system").await.unwrap();
        assert_eq!(hold.unwrap().incident_id.as_deref(), Some("inc-1"));

        f.registry
            .release_hold(&family_hold.hold_id, "audit done", &counsel())
            .await
            .unwrap();
        assert!(f.registry.is_held(&critical).await);
    }
}
