//! Per-family retention and deletion policy.
//!
//! Families without a stored policy get [`FamilyPolicy::defaults`]: 90 days of retention, legal
//! holds enabled with automatic holds for critical incidents, and deletion only through an
//! approved request confirmed with step-up authentication.

pub mod legal_hold;

pub use legal_hold::{LegalHold, LegalHoldRegistry};

use crate::auth::{Actor, Permission};
use crate::error::{Result, WardenError};
use crate::types::{FamilyId, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Shortest allowed retention window.
pub const MIN_RETENTION_DAYS: u32 = 1;

/// Longest allowed retention window (ten years).
pub const MAX_RETENTION_DAYS: u32 = 3650;

/// How deletions are authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteMode {
    /// A request by an actor who may also approve is approved immediately.
    Direct,
    /// Every request waits for a separate approval.
    RequestOnly,
}

/// Retention and deletion settings of a family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyPolicy {
    pub family_id: FamilyId,
    /// Minimum age, from capture, before deleted evidence may be purged.
    pub retention_days: u32,
    pub legal_hold_enabled: bool,
    /// Intake at or above this severity places an incident hold automatically.
    pub auto_legal_hold_severity: Severity,
    pub delete_mode: DeleteMode,
    pub require_2fa_for_delete: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl FamilyPolicy {
    pub fn defaults(family_id: impl Into<String>) -> Self {
        Self {
            family_id: family_id.into(),
            retention_days: 90,
            legal_hold_enabled: true,
            auto_legal_hold_severity: Severity::Critical,
            delete_mode: DeleteMode::RequestOnly,
            require_2fa_for_delete: true,
            updated_at: None,
            updated_by: None,
        }
    }
}

/// Partial policy update. Unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyUpdate {
    pub retention_days: Option<u32>,
    pub legal_hold_enabled: Option<bool>,
    pub auto_legal_hold_severity: Option<Severity>,
    pub delete_mode: Option<DeleteMode>,
    pub require_2fa_for_delete: Option<bool>,
}

/// Stores family policies.
#[derive(Clone, Default)]
pub struct PolicyStore {
    policies: Arc<RwLock<HashMap<FamilyId, FamilyPolicy>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored policy, or the defaults.
    pub async fn get_policy(&self, family_id: &str) -> FamilyPolicy {
        self.policies
            .read()
            .await
            .get(family_id)
            .cloned()
            .unwrap_or_else(|| FamilyPolicy::defaults(family_id))
    }

    /// Apply an update on behalf of `actor`.
    pub async fn set_policy(
        &self,
        family_id: &str,
        update: PolicyUpdate,
        actor: &Actor,
    ) -> Result<FamilyPolicy> {
        actor.authorize(Permission::ManagePolicy, family_id)?;

        if let Some(days) = update.retention_days {
            if !(MIN_RETENTION_DAYS..=MAX_RETENTION_DAYS).contains(&days) {
                return Err(WardenError::Validation(format!(
                    "retention_days must be within [{}, {}], got {}",
                    MIN_RETENTION_DAYS, MAX_RETENTION_DAYS, days
                )));
            }
        }

        let mut policies = self.policies.write().await;
        let mut policy = policies
            .get(family_id)
            .cloned()
            .unwrap_or_else(|| FamilyPolicy::defaults(family_id));

        if let Some(days) = update.retention_days {
            policy.retention_days = days;
        }
        if let Some(enabled) = update.legal_hold_enabled {
            policy.legal_hold_enabled = enabled;
        }
        if let Some(severity) = update.auto_legal_hold_severity {
            policy.auto_legal_hold_severity = severity;
        }
        if let Some(mode) = update.delete_mode {
            policy.delete_mode = mode;
        }
        if let Some(required) = update.require_2fa_for_delete {
            policy.require_2fa_for_delete = required;
        }
        policy.updated_at = Some(crate::types::now());
        policy.updated_by = Some(actor.id.clone());

        policies.insert(family_id.to_string(), policy.clone());

        info!(
            family_id,
            retention_days = policy.retention_days,
            delete_mode = ?policy.delete_mode,
            updated_by = %actor.id,
            "Updated family policy"
        );

        Ok(policy)
    }
}
