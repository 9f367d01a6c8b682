//! Background job queue.
//!
//! Request handlers submit a typed [`Task`] and return at once with a [`JobHandle`]. A pool of
//! workers drains a bounded channel, runs each task through a [`TaskExecutor`], retries
//! transient failures with exponential backoff and records progress and results for
//! [`JobQueue::status`].

mod executor;

pub use executor::WardenExecutor;

use crate::auth::Actor;
use crate::config::JobsConfig;
use crate::error::{Result, WardenError};
use crate::package::EvidenceFilter;
use crate::types::FamilyId;
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Unique identifier of a job.
pub type JobId = String;

/// Work a job performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    BuildPackage {
        family_id: FamilyId,
        filter: EvidenceFilter,
        actor: Actor,
    },
    PurgeFamily {
        family_id: FamilyId,
    },
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::BuildPackage { .. } => "build_package",
            Task::PurgeFamily { .. } => "purge_family",
        }
    }

    pub fn family_id(&self) -> &str {
        match self {
            Task::BuildPackage { family_id, .. } | Task::PurgeFamily { family_id } => family_id,
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// Externally visible status of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    /// Percent complete, 0 to 100.
    pub progress: u8,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Returned on submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_id: JobId,
    pub status_url: String,
}

/// Runs tasks for the queue.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute one attempt of `task`, returning its JSON result.
    async fn execute(&self, task: &Task, progress: &ProgressReporter) -> Result<serde_json::Value>;
}

struct JobRecord {
    task: Task,
    status: JobStatus,
    /// Set when the job completes, fails or is cancelled.
    finished_at: Option<Instant>,
}

impl JobRecord {
    fn finish(&mut self, f: impl FnOnce(&mut JobStatus)) {
        f(&mut self.status);
        self.finished_at = Some(Instant::now());
    }
}

type JobTable = Arc<parking_lot::RwLock<HashMap<JobId, JobRecord>>>;

/// Progress sink handed to executors.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    jobs: JobTable,
}

impl ProgressReporter {
    /// Record progress; values above 100 are clamped and progress never goes backwards.
    pub fn report(&self, percent: u8) {
        if let Some(record) = self.jobs.write().get_mut(&self.job_id) {
            record.status.progress = record.status.progress.max(percent.min(100));
        }
    }
}

/// Bounded job queue served by a worker pool.
pub struct JobQueue {
    jobs: JobTable,
    sender: mpsc::Sender<JobId>,
    finished_ttl: Duration,
}

impl JobQueue {
    /// Create the queue and spawn `config.workers` workers.
    pub fn start(
        config: &JobsConfig,
        executor: Arc<dyn TaskExecutor>,
        shutdown: &broadcast::Sender<()>,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let queue = Arc::new(Self {
            jobs: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            sender,
            finished_ttl: config.finished_ttl,
        });

        let receiver = Arc::new(Mutex::new(receiver));
        let retry = RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
        };

        let handles = (0..config.workers.max(1))
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    jobs: queue.jobs.clone(),
                    receiver: receiver.clone(),
                    executor: executor.clone(),
                    retry: retry.clone(),
                    shutdown: shutdown.subscribe(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(workers = config.workers, capacity = config.queue_capacity, "Job queue started");
        (queue, handles)
    }

    /// Drop finished jobs older than the configured TTL, returning how many were removed.
    pub fn prune_finished(&self) -> usize {
        let ttl = self.finished_ttl;
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, record| match record.finished_at {
            Some(at) => at.elapsed() < ttl,
            None => true,
        });
        let pruned = before - jobs.len();
        if pruned > 0 {
            debug!(pruned, remaining = jobs.len(), "Pruned finished jobs");
        }
        pruned
    }

    /// Enqueue a task.
    pub fn submit(&self, task: Task) -> Result<JobHandle> {
        self.prune_finished();
        let job_id = crate::types::new_id();
        let kind = task.kind();
        self.jobs.write().insert(
            job_id.clone(),
            JobRecord {
                task,
                status: JobStatus {
                    id: job_id.clone(),
                    state: JobState::Waiting,
                    progress: 0,
                    attempts_made: 0,
                    failed_reason: None,
                    result: None,
                },
                finished_at: None,
            },
        );

        if let Err(e) = self.sender.try_send(job_id.clone()) {
            self.jobs.write().remove(&job_id);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    WardenError::Storage("job queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    WardenError::Internal("job queue is shut down".to_string())
                }
            });
        }

        debug!(job_id = %job_id, kind, "Submitted job");
        Ok(JobHandle {
            status_url: format!("/jobs/{}", job_id),
            job_id,
        })
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        self.jobs
            .read()
            .get(job_id)
            .map(|record| record.status.clone())
            .ok_or_else(|| WardenError::NotFound(format!("job {}", job_id)))
    }

    /// Task of a job, for authorization checks.
    pub fn task(&self, job_id: &str) -> Result<Task> {
        self.jobs
            .read()
            .get(job_id)
            .map(|record| record.task.clone())
            .ok_or_else(|| WardenError::NotFound(format!("job {}", job_id)))
    }

    /// Cancel a job that has not started yet.
    pub fn cancel(&self, job_id: &str) -> Result<JobStatus> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| WardenError::NotFound(format!("job {}", job_id)))?;

        if record.status.state != JobState::Waiting {
            return Err(WardenError::InvalidState(format!(
                "job {} is {}, only waiting jobs can be cancelled",
                job_id,
                record.status.state.as_str()
            )));
        }

        record.finish(|s| {
            s.state = JobState::Failed;
            s.failed_reason = Some("cancelled".to_string());
        });
        counter!("warden_jobs_total", "state" => "cancelled").increment(1);
        info!(job_id, "Cancelled job");
        Ok(record.status.clone())
    }
}

#[derive(Clone)]
struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

struct Worker {
    id: usize,
    jobs: JobTable,
    receiver: Arc<Mutex<mpsc::Receiver<JobId>>>,
    executor: Arc<dyn TaskExecutor>,
    retry: RetryPolicy,
    shutdown: broadcast::Receiver<()>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    job_id = receiver.recv() => job_id,
                    _ = self.shutdown.recv() => None,
                }
            };
            let Some(job_id) = next else {
                debug!(worker = self.id, "Job worker stopping");
                break;
            };
            self.process(&job_id).await;
        }
    }

    /// Claim a waiting job, returning its task.
    fn claim(&self, job_id: &str) -> Option<Task> {
        let mut jobs = self.jobs.write();
        let record = jobs.get_mut(job_id)?;
        if record.status.state != JobState::Waiting {
            debug!(job_id, state = record.status.state.as_str(), "Skipping job");
            return None;
        }
        record.status.state = JobState::Active;
        Some(record.task.clone())
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut JobStatus)) {
        if let Some(record) = self.jobs.write().get_mut(job_id) {
            f(&mut record.status);
        }
    }

    fn finish(&self, job_id: &str, f: impl FnOnce(&mut JobStatus)) {
        if let Some(record) = self.jobs.write().get_mut(job_id) {
            record.finish(f);
        }
    }

    async fn process(&self, job_id: &str) {
        let Some(task) = self.claim(job_id) else {
            return;
        };
        let reporter = ProgressReporter {
            job_id: job_id.to_string(),
            jobs: self.jobs.clone(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.update(job_id, |s| s.attempts_made = attempt);

            match self.executor.execute(&task, &reporter).await {
                Ok(result) => {
                    self.finish(job_id, |s| {
                        s.state = JobState::Completed;
                        s.progress = 100;
                        s.result = Some(result);
                    });
                    counter!("warden_jobs_total", "state" => "completed").increment(1);
                    info!(job_id, kind = task.kind(), attempt, "Job completed");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        job_id,
                        kind = task.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.finish(job_id, |s| {
                        s.state = JobState::Failed;
                        s.failed_reason = Some(e.to_string());
                    });
                    counter!("warden_jobs_total", "state" => "failed").increment(1);
                    error!(job_id, kind = task.kind(), attempt, error = %e, "Job failed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error for the first `failures` attempts.
    struct FlakyExecutor {
        failures: u32,
        retryable: bool,
        calls: AtomicU32,
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    impl FlakyExecutor {
        fn new(failures: u32, retryable: bool) -> Self {
            Self {
                failures,
                retryable,
                calls: AtomicU32::new(0),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for FlakyExecutor {
        async fn execute(&self, task: &Task, progress: &ProgressReporter) -> Result<serde_json::Value> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            progress.report(50);
            if call <= self.failures {
                return Err(if self.retryable {
                    WardenError::Storage("object store unavailable".into())
                } else {
                    WardenError::Validation("bad filter".into())
                });
            }
            Ok(serde_json::json!({ "family_id": task.family_id() }))
        }
    }

    fn config(workers: usize) -> JobsConfig {
        JobsConfig {
            workers,
            queue_capacity: 16,
            max_attempts: 2,
            backoff_base: Duration::from_millis(5),
            finished_ttl: Duration::from_secs(60),
        }
    }

    fn purge(family: &str) -> Task {
        Task::PurgeFamily {
            family_id: family.into(),
        }
    }

    async fn wait_for(queue: &JobQueue, job_id: &str, state: JobState) -> JobStatus {
        for _ in 0..200 {
            let status = queue.status(job_id).unwrap();
            if status.state == state {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}", job_id, state);
    }

    #[tokio::test]
    async fn test_job_completes_with_result() {
        let (shutdown, _) = broadcast::channel(1);
        let (queue, _handles) = JobQueue::start(&config(2), Arc::new(FlakyExecutor::new(0, true)), &shutdown);

        let handle = queue.submit(purge("fam-1")).unwrap();
        assert_eq!(handle.status_url, format!("/jobs/{}", handle.job_id));

        let status = wait_for(&queue, &handle.job_id, JobState::Completed).await;
        assert_eq!(status.progress, 100);
        assert_eq!(status.attempts_made, 1);
        assert_eq!(status.result, Some(serde_json::json!({"family_id": "fam-1"})));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (shutdown, _) = broadcast::channel(1);
        let (queue, _handles) = JobQueue::start(&config(1), Arc::new(FlakyExecutor::new(1, true)), &shutdown);

        let handle = queue.submit(purge("fam-1")).unwrap();
        let status = wait_for(&queue, &handle.job_id, JobState::Completed).await;
        assert_eq!(status.attempts_made, 2);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let (shutdown, _) = broadcast::channel(1);
        let (queue, _handles) = JobQueue::start(&config(1), Arc::new(FlakyExecutor::new(5, true)), &shutdown);

        let handle = queue.submit(purge("fam-1")).unwrap();
        let status = wait_for(&queue, &handle.job_id, JobState::Failed).await;
        assert_eq!(status.attempts_made, 2);
        assert!(status.failed_reason.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let (shutdown, _) = broadcast::channel(1);
        let (queue, _handles) = JobQueue::start(&config(1), Arc::new(FlakyExecutor::new(1, false)), &shutdown);

        let handle = queue.submit(purge("fam-1")).unwrap();
        let status = wait_for(&queue, &handle.job_id, JobState::Failed).await;
        assert_eq!(status.attempts_made, 1);
    }

    #[tokio::test]
    async fn test_cancel_only_while_waiting() {
        let (shutdown, _) = broadcast::channel(1);
        let gate = Arc::new(tokio::sync::Notify::new());
        let executor = FlakyExecutor {
            gate: Some(gate.clone()),
            ..FlakyExecutor::new(0, true)
        };
        let (queue, _handles) = JobQueue::start(&config(1), Arc::new(executor), &shutdown);

        // The single worker blocks on the first job; the second stays waiting.
        let first = queue.submit(purge("fam-1")).unwrap();
        wait_for(&queue, &first.job_id, JobState::Active).await;
        let second = queue.submit(purge("fam-2")).unwrap();

        let cancelled = queue.cancel(&second.job_id).unwrap();
        assert_eq!(cancelled.state, JobState::Failed);
        assert_eq!(cancelled.failed_reason.as_deref(), Some("cancelled"));

        assert!(matches!(queue.cancel(&first.job_id), Err(WardenError::InvalidState(_))));
        assert!(matches!(queue.cancel("nope"), Err(WardenError::NotFound(_))));

        gate.notify_one();
        wait_for(&queue, &first.job_id, JobState::Completed).await;

        // The cancelled job is skipped, not run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.status(&second.job_id).unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_workers_stop_on_shutdown() {
        let (shutdown, _) = broadcast::channel(1);
        let (_queue, handles) = JobQueue::start(&config(3), Arc::new(FlakyExecutor::new(0, true)), &shutdown);
        shutdown.send(()).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted_after_ttl() {
        let (shutdown, _) = broadcast::channel(1);
        let gate = Arc::new(tokio::sync::Notify::new());
        let executor = FlakyExecutor {
            gate: Some(gate.clone()),
            ..FlakyExecutor::new(0, true)
        };
        let config = JobsConfig {
            finished_ttl: Duration::from_millis(200),
            ..config(1)
        };
        let (queue, _handles) = JobQueue::start(&config, Arc::new(executor), &shutdown);

        let done = queue.submit(purge("fam-1")).unwrap();
        gate.notify_one();
        wait_for(&queue, &done.job_id, JobState::Completed).await;

        // Unfinished jobs are never evicted, however old.
        let running = queue.submit(purge("fam-2")).unwrap();
        wait_for(&queue, &running.job_id, JobState::Active).await;
        let waiting = queue.submit(purge("fam-3")).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(queue.prune_finished(), 1);
        assert!(matches!(queue.status(&done.job_id), Err(WardenError::NotFound(_))));
        assert_eq!(queue.status(&running.job_id).unwrap().state, JobState::Active);
        assert_eq!(queue.status(&waiting.job_id).unwrap().state, JobState::Waiting);

        gate.notify_one();
        gate.notify_one();
        wait_for(&queue, &waiting.job_id, JobState::Completed).await;
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy {
            max_attempts: 4,
            backoff_base: Duration::from_millis(100),
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = JobStatus {
            id: "j1".into(),
            state: JobState::Waiting,
            progress: 0,
            attempts_made: 0,
            failed_reason: None,
            result: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["state"], "waiting");
        assert!(value.get("attemptsMade").is_some());
        assert!(value.get("failedReason").is_some());
    }
}
