//! Retention purge of soft-deleted evidence.
//!
//! Deleted evidence keeps its bytes until it is older than the family's retention window and no
//! legal hold covers it. [`PurgeWorker::purge_family`] removes the bytes of eligible items and
//! records the purge on their custody chains; the chains themselves are never purged.
//! [`PurgeScheduler`] enqueues a purge job for every family on a fixed interval.

use crate::auth::{Actor, Permission};
use crate::custody::{CustodyAction, CustodyLedger};
use crate::error::{Result, WardenError};
use crate::evidence::EvidenceStore;
use crate::jobs::{JobQueue, Task};
use crate::object_store::ObjectStore;
use crate::policy::{LegalHoldRegistry, PolicyStore};
use crate::types::FamilyId;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Default number of items purged per run.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Result of purging one family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub family_id: FamilyId,
    /// Candidates examined before the batch filled up.
    pub scanned: usize,
    pub purged: usize,
    /// Skipped because a legal hold covers them.
    pub held: usize,
    /// Skipped because they are younger than the retention window.
    pub retained: usize,
    /// Object deletions that failed.
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Purges eligible evidence, one run per family at a time.
pub struct PurgeWorker {
    objects: Arc<dyn ObjectStore>,
    evidence: Arc<dyn EvidenceStore>,
    policies: PolicyStore,
    holds: Arc<LegalHoldRegistry>,
    ledger: Arc<CustodyLedger>,
    batch_size: usize,
    family_locks: parking_lot::Mutex<HashMap<FamilyId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PurgeWorker {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        evidence: Arc<dyn EvidenceStore>,
        policies: PolicyStore,
        holds: Arc<LegalHoldRegistry>,
        ledger: Arc<CustodyLedger>,
    ) -> Self {
        Self {
            objects,
            evidence,
            policies,
            holds,
            ledger,
            batch_size: DEFAULT_BATCH_SIZE,
            family_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn family_lock(&self, family_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.family_locks
            .lock()
            .entry(family_id.to_string())
            .or_default()
            .clone()
    }

    /// Purge one batch of a family's eligible evidence.
    pub async fn purge_family(&self, family_id: &str, actor: &Actor) -> Result<PurgeReport> {
        actor.authorize(Permission::PurgeEvidence, family_id)?;

        let lock = self.family_lock(family_id);
        let _guard = lock.lock().await;

        let start = Instant::now();
        let policy = self.policies.get_policy(family_id).await;
        let candidates = self.evidence.purge_candidates(family_id).await?;
        let now = crate::types::now();

        let mut report = PurgeReport {
            family_id: family_id.to_string(),
            ..Default::default()
        };

        // Skipped items do not count against the batch.
        for item in candidates {
            if report.purged + report.failed >= self.batch_size {
                break;
            }
            report.scanned += 1;

            let age = crate::types::age_days(now, item.captured_at);
            if age < i64::from(policy.retention_days) {
                debug!(
                    evidence_id = %item.evidence_id,
                    age_days = age,
                    retention_days = policy.retention_days,
                    "Purge skipped: within retention"
                );
                report.retained += 1;
                continue;
            }

            // No hold can be placed between this check and the purge record.
            let _frozen = self.holds.freeze_family(family_id).await;
            if self.holds.is_held(&item).await {
                info!(evidence_id = %item.evidence_id, family_id, "Purge skipped: legal hold");
                report.held += 1;
                continue;
            }

            match self.objects.delete(&item.storage_key).await {
                Ok(()) | Err(WardenError::ObjectNotFound(_)) => {}
                Err(e) => {
                    warn!(evidence_id = %item.evidence_id, error = %e, "Failed to delete evidence bytes");
                    report.failed += 1;
                    report
                        .errors
                        .push(format!("Failed to delete {}: {}", item.evidence_id, e));
                    continue;
                }
            }

            if let Err(e) = self.finish_purge(&item.evidence_id, &actor.id).await {
                error!(evidence_id = %item.evidence_id, error = %e, "Failed to record purge");
                report.failed += 1;
                report
                    .errors
                    .push(format!("Failed to record purge of {}: {}", item.evidence_id, e));
                continue;
            }
            report.purged += 1;
        }

        counter!("warden_purged_total").increment(report.purged as u64);
        info!(
            family_id,
            scanned = report.scanned,
            purged = report.purged,
            held = report.held,
            retained = report.retained,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Purge run completed"
        );

        Ok(report)
    }

    async fn finish_purge(&self, evidence_id: &str, actor: &str) -> Result<()> {
        self.evidence
            .mark_purged(evidence_id, crate::types::now())
            .await?;
        self.ledger
            .append(
                evidence_id,
                actor,
                CustodyAction::Release,
                evidence_id,
                json!({ "purge": "permanent" }),
            )
            .await?;
        Ok(())
    }
}

/// Enqueues a purge job for every known family on a fixed interval.
pub struct PurgeScheduler {
    evidence: Arc<dyn EvidenceStore>,
    jobs: Arc<JobQueue>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl PurgeScheduler {
    pub fn new(
        evidence: Arc<dyn EvidenceStore>,
        jobs: Arc<JobQueue>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            evidence,
            jobs,
            interval,
            shutdown,
        }
    }

    /// Enqueue one purge job per family now.
    pub async fn tick(&self) -> Result<usize> {
        let families = self.evidence.families().await?;
        let mut enqueued = 0;
        for family_id in families {
            match self.jobs.submit(Task::PurgeFamily {
                family_id: family_id.clone(),
            }) {
                Ok(handle) => {
                    debug!(family_id = %family_id, job_id = %handle.job_id, "Enqueued purge");
                    enqueued += 1;
                }
                Err(e) => warn!(family_id = %family_id, error = %e, "Failed to enqueue purge"),
            }
        }
        Ok(enqueued)
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Purge scheduler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Purge scheduling failed");
                    }
                }
                _ = self.shutdown.recv() => {
                    info!("Purge scheduler shutting down");
                    break;
                }
            }
        }
    }
}
