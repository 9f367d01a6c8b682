//! Authorization for custody actions.
//!
//! Identity is established upstream; this module decides what an authenticated [`Actor`] may do
//! and issues the step-up credentials required before destructive actions.

// Panics in authorization code can lead to security vulnerabilities.
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod roles;
pub mod step_up;

pub use roles::{role_allows, Permission, Role};
pub use step_up::{StepUpAuthenticator, StepUpToken};

use crate::error::{Result, WardenError};
use crate::types::FamilyId;
use serde::{Deserialize, Serialize};

/// An authenticated principal acting on evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User or service identifier.
    pub id: String,
    /// Role granted by the upstream authenticator.
    pub role: Role,
    /// Login session the actor is acting in.
    pub session_id: Option<String>,
    /// Family the actor is scoped to. `None` means not family-scoped.
    pub family_id: Option<FamilyId>,
}

impl Actor {
    /// Create a family-scoped actor.
    pub fn new(id: impl Into<String>, role: Role, family_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            session_id: None,
            family_id: Some(family_id.into()),
        }
    }

    /// The service's own identity, used by background workers.
    pub fn system() -> Self {
        Self {
            id: "system".to_string(),
            role: Role::System,
            session_id: None,
            family_id: None,
        }
    }

    /// Set the session.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Whether the actor may act within `family_id`.
    pub fn in_family(&self, family_id: &str) -> bool {
        match &self.family_id {
            Some(own) => own == family_id,
            None => self.role.is_cross_family(),
        }
    }

    /// Fail with [`WardenError::Forbidden`] unless the actor holds `permission` in `family_id`.
    pub fn authorize(&self, permission: Permission, family_id: &str) -> Result<()> {
        if !role_allows(self.role, permission) {
            return Err(WardenError::Forbidden(format!(
                "role {:?} lacks {:?}",
                self.role, permission
            )));
        }
        if !self.in_family(family_id) {
            return Err(WardenError::Forbidden(format!(
                "actor {} is not scoped to family {}",
                self.id, family_id
            )));
        }
        Ok(())
    }
}
