//! Warden - evidence custody and integrity service.
//!
//! Warden preserves captured evidence (alerts, screenshots, conversation logs) so that it can be
//! handed to a third party and proven untampered, offline.
//!
//! # Features
//!
//! - **Custody Ledger**: append-only, per-item hash chain of every action taken on evidence.
//! - **Signed Packages**: export archives with a SHA-256 manifest signed by Ed25519, verifiable
//!   with nothing but the archive and a public key.
//! - **Legal Holds**: holds that block deletion and purge, placed manually or automatically.
//! - **Deletion Governance**: request, approve and execute with a single-use step-up token.
//! - **Retention Purge**: background removal of soft-deleted evidence past retention.
//! - **Key Rotation**: staged rotation of per-device shared keys.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  HTTP API (axum) | CLI: serve / verify / keygen             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Governance | Legal Holds | Policy | Step-up | Device Keys  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Job Queue: package builds | retention purges               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Custody Ledger | Evidence Store | Object Store             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use warden::config::WardenConfig;
//!
//! #[tokio::main]
//! async fn main() -> warden::Result<()> {
//!     let config = WardenConfig::development();
//!     warden::run(config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub mod api;
pub mod auth;
pub mod custody;
pub mod evidence;
pub mod governance;
pub mod jobs;
pub mod keys;
pub mod object_store;
pub mod package;
pub mod policy;
pub mod purge;

pub mod cli;
pub mod observability;
pub mod shutdown;

// Re-exports
pub use error::{Result, WardenError};
pub use types::*;

use auth::StepUpAuthenticator;
use config::WardenConfig;
use custody::{CustodyLedger, MemoryCustodyStore};
use evidence::{EvidenceService, EvidenceStore, MemoryEvidenceStore};
use governance::DeletionGovernance;
use jobs::{JobQueue, WardenExecutor};
use keys::KeyRotationManager;
use object_store::{FsObjectStore, MemoryObjectStore, ObjectStore};
use package::{PackageBuilder, SigningKeyring};
use policy::{LegalHoldRegistry, PolicyStore};
use purge::{PurgeScheduler, PurgeWorker};
use shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// All Warden services, wired to shared stores.
pub struct Warden {
    pub objects: Arc<dyn ObjectStore>,
    pub evidence_store: Arc<dyn EvidenceStore>,
    pub ledger: Arc<CustodyLedger>,
    pub policies: PolicyStore,
    pub holds: Arc<LegalHoldRegistry>,
    pub evidence: Arc<EvidenceService>,
    pub governance: Arc<DeletionGovernance>,
    pub step_up: Arc<StepUpAuthenticator>,
    pub keyring: Arc<SigningKeyring>,
    pub packages: Arc<PackageBuilder>,
    pub purge: Arc<PurgeWorker>,
    pub devices: KeyRotationManager,
}

impl Warden {
    /// Wire the services over the given object store and signing keyring.
    ///
    /// Evidence metadata and custody chains are kept in memory.
    pub fn new(
        config: &WardenConfig,
        objects: Arc<dyn ObjectStore>,
        keyring: Arc<SigningKeyring>,
    ) -> Result<Self> {
        let evidence_store: Arc<dyn EvidenceStore> = Arc::new(MemoryEvidenceStore::new());
        let ledger = Arc::new(CustodyLedger::new(Arc::new(MemoryCustodyStore::new())));
        let policies = PolicyStore::new();
        let holds = Arc::new(LegalHoldRegistry::new(
            policies.clone(),
            evidence_store.clone(),
            ledger.clone(),
        ));
        let step_up = Arc::new(StepUpAuthenticator::from_config(&config.step_up)?);

        let evidence = Arc::new(EvidenceService::new(
            objects.clone(),
            evidence_store.clone(),
            ledger.clone(),
            holds.clone(),
        ));
        let governance = Arc::new(DeletionGovernance::new(
            evidence_store.clone(),
            policies.clone(),
            holds.clone(),
            ledger.clone(),
            step_up.clone(),
        ));
        let packages = Arc::new(PackageBuilder::new(
            objects.clone(),
            evidence_store.clone(),
            ledger.clone(),
            keyring.clone(),
        ));
        let purge = Arc::new(
            PurgeWorker::new(
                objects.clone(),
                evidence_store.clone(),
                policies.clone(),
                holds.clone(),
                ledger.clone(),
            )
            .with_batch_size(config.purge.batch_size),
        );

        Ok(Self {
            objects,
            evidence_store,
            ledger,
            policies,
            holds,
            evidence,
            governance,
            step_up,
            keyring,
            packages,
            purge,
            devices: KeyRotationManager::new(),
        })
    }

    /// Open the object store and signing key described by `config`.
    pub async fn open(config: &WardenConfig) -> Result<Self> {
        let objects: Arc<dyn ObjectStore> = match &config.storage.object_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "Using filesystem object store");
                Arc::new(FsObjectStore::open(dir.clone()).await?)
            }
            None => {
                info!("Using in-memory object store");
                Arc::new(MemoryObjectStore::new())
            }
        };

        let keyring = match &config.signing.key_path {
            Some(path) => {
                SigningKeyring::load_or_generate(path, config.signing.generate_if_missing).await?
            }
            None => {
                let keyring = SigningKeyring::generate()?;
                info!(key_id = %keyring.key_id(), "Generated ephemeral signing key");
                keyring
            }
        };

        Self::new(config, objects, Arc::new(keyring))
    }

    /// Executor running this instance's background tasks.
    pub fn executor(&self) -> Arc<WardenExecutor> {
        Arc::new(WardenExecutor::new(self.packages.clone(), self.purge.clone()))
    }
}

/// Run the Warden server with the given configuration.
pub async fn run(config: WardenConfig) -> Result<()> {
    observability::init(&config.observability)?;
    config.validate()?;

    let metrics = if config.observability.metrics_enabled {
        Some(observability::install_metrics()?)
    } else {
        None
    };

    let warden = Arc::new(Warden::open(&config).await?);
    info!(key_id = %warden.keyring.key_id(), "Starting Warden");

    let coordinator = ShutdownCoordinator::new();
    let (jobs, mut handles) = JobQueue::start(&config.jobs, warden.executor(), coordinator.sender());

    if config.purge.enabled {
        let scheduler = PurgeScheduler::new(
            warden.evidence_store.clone(),
            jobs.clone(),
            config.purge.interval,
            coordinator.subscribe(),
        );
        handles.push(tokio::spawn(scheduler.run()));
    }

    tokio::spawn(shutdown::handle_signals(coordinator.clone()));

    let app = api::router(api::AppState::new(warden, jobs, metrics));
    let listener = TcpListener::bind(config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "Warden API listening");

    let server_coordinator = coordinator.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_coordinator.wait_for_shutdown().await })
        .await;

    // The server can also stop on its own error; make sure everything else follows.
    coordinator.shutdown();
    coordinator.drain(handles).await;

    if let Err(e) = served {
        error!(error = %e, "API server failed");
        return Err(WardenError::Io(e));
    }

    info!("Warden shutdown complete");
    Ok(())
}
