//! Common test utilities for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use warden::auth::{Actor, Role};
use warden::config::WardenConfig;
use warden::evidence::NewEvidence;
use warden::object_store::{FsObjectStore, ObjectStore};
use warden::package::SigningKeyring;
use warden::{EvidenceItem, EvidenceKind, Severity, Warden};

pub const FAMILY: &str = "fam-1";
pub const PIN: &str = "2468";

/// A Warden instance over a temporary filesystem object store.
pub struct TestWarden {
    pub temp_dir: TempDir,
    pub config: WardenConfig,
    pub warden: Arc<Warden>,
}

impl TestWarden {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = WardenConfig::development();
        config.storage.object_dir = Some(temp_dir.path().join("objects"));

        let objects: Arc<dyn ObjectStore> = Arc::new(
            FsObjectStore::open(temp_dir.path().join("objects"))
                .await
                .expect("Failed to open object store"),
        );
        let keyring = Arc::new(SigningKeyring::generate().expect("Failed to generate key"));
        let warden = Arc::new(Warden::new(&config, objects, keyring).expect("Failed to wire Warden"));

        Self {
            temp_dir,
            config,
            warden,
        }
    }

    /// Record an alert for `FAMILY`.
    pub async fn ingest(&self, incident_id: Option<&str>, severity: Severity) -> EvidenceItem {
        self.ingest_captured(incident_id, severity, None).await
    }

    pub async fn ingest_captured(
        &self,
        incident_id: Option<&str>,
        severity: Severity,
        captured_at: Option<DateTime<Utc>>,
    ) -> EvidenceItem {
        self.warden
            .evidence
            .ingest(new_evidence(incident_id, severity, captured_at), &Actor::system())
            .await
            .expect("Failed to ingest evidence")
    }
}

pub fn new_evidence(
    incident_id: Option<&str>,
    severity: Severity,
    captured_at: Option<DateTime<Utc>>,
) -> NewEvidence {
    NewEvidence {
        family_id: FAMILY.to_string(),
        incident_id: incident_id.map(str::to_string),
        device_id: Some("phone-1".to_string()),
        kind: EvidenceKind::Alert,
        file_name: "alert.json".to_string(),
        content_type: "application/json".to_string(),
        captured_at,
        classification: "bullying".to_string(),
        severity,
        summary: "threatening messages in group chat".to_string(),
        bytes: br#"{"message":"you will regret this"}"#.to_vec(),
    }
}

pub fn guardian() -> Actor {
    Actor::new("parent-1", Role::Guardian, FAMILY).with_session("sess-1")
}

pub fn legal_officer() -> Actor {
    Actor::new("counsel-1", Role::LegalOfficer, FAMILY).with_session("sess-2")
}

pub fn viewer() -> Actor {
    Actor::new("teen-1", Role::Viewer, FAMILY)
}
