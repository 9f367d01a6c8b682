//! Role to permission mapping.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Role of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Parent or guardian owning the family's evidence.
    Guardian,
    /// Read-only family member.
    Viewer,
    /// Counsel managing holds and approving deletions.
    LegalOfficer,
    /// Operator of the service.
    Administrator,
    /// The service itself (intake, purge, rotation).
    System,
}

impl Role {
    /// Roles that are not bound to a single family.
    pub fn is_cross_family(&self) -> bool {
        matches!(self, Role::Administrator | Role::System)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "guardian" => Ok(Role::Guardian),
            "viewer" => Ok(Role::Viewer),
            "legal_officer" => Ok(Role::LegalOfficer),
            "administrator" | "admin" => Ok(Role::Administrator),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Action an actor may be allowed to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    RecordEvidence,
    ViewEvidence,
    ExportPackage,
    ManagePolicy,
    PlaceHold,
    ReleaseHold,
    RequestDelete,
    ApproveDelete,
    ExecuteDelete,
    PurgeEvidence,
    RotateKeys,
}

/// Capability check evaluated before every governance transition.
pub fn role_allows(role: Role, permission: Permission) -> bool {
    use Permission::*;

    match role {
        Role::Guardian => matches!(
            permission,
            ViewEvidence
                | ExportPackage
                | ManagePolicy
                | PlaceHold
                | RequestDelete
                | ApproveDelete
                | ExecuteDelete
        ),
        Role::Viewer => matches!(permission, ViewEvidence),
        Role::LegalOfficer => matches!(
            permission,
            ViewEvidence | ExportPackage | PlaceHold | ReleaseHold | ApproveDelete
        ),
        Role::Administrator => !matches!(permission, RecordEvidence | PurgeEvidence),
        Role::System => matches!(
            permission,
            RecordEvidence | ViewEvidence | ExportPackage | PlaceHold | PurgeEvidence | RotateKeys
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewer_is_read_only() {
        assert!(role_allows(Role::Viewer, Permission::ViewEvidence));
        assert!(!role_allows(Role::Viewer, Permission::ExportPackage));
        assert!(!role_allows(Role::Viewer, Permission::RequestDelete));
    }

    #[test]
    fn test_only_legal_roles_release_holds() {
        assert!(role_allows(Role::LegalOfficer, Permission::ReleaseHold));
        assert!(role_allows(Role::Administrator, Permission::ReleaseHold));
        assert!(!role_allows(Role::Guardian, Permission::ReleaseHold));
        assert!(!role_allows(Role::System, Permission::ReleaseHold));
    }

    #[test]
    fn test_purge_is_system_only() {
        assert!(role_allows(Role::System, Permission::PurgeEvidence));
        assert!(!role_allows(Role::Administrator, Permission::PurgeEvidence));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Guardian".parse::<Role>().unwrap(), Role::Guardian);
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Administrator);
        assert!("root".parse::<Role>().is_err());
    }
}
