//! Graceful shutdown handling for Warden.
//!
//! One coordinator broadcasts the shutdown signal to the HTTP server, the job workers and the
//! purge scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Maximum time to wait for graceful shutdown before giving up on workers.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shutdown coordinator for managing graceful service termination.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    /// Broadcast channel for shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
    /// Watch channel for checking if shutdown is in progress.
    shutdown_watch: watch::Receiver<bool>,
    shutdown_watch_tx: Arc<watch::Sender<bool>>,
    is_shutting_down: Arc<AtomicBool>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (shutdown_watch_tx, shutdown_watch) = watch::channel(false);

        Self {
            shutdown_tx,
            shutdown_watch,
            shutdown_watch_tx: Arc::new(shutdown_watch_tx),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Subscribe to shutdown signals.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// The broadcast sender, for components that subscribe their own tasks.
    pub fn sender(&self) -> &broadcast::Sender<()> {
        &self.shutdown_tx
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown");
            let _ = self.shutdown_watch_tx.send(true);
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Wait for shutdown signal (for use in select! macros and graceful server shutdown).
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_watch.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for background tasks to finish, up to the shutdown timeout.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>) {
        let wait_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Background task panicked");
                }
            }
        };
        if tokio::time::timeout(self.timeout, wait_all).await.is_err() {
            warn!(timeout_secs = self.timeout.as_secs(), "Shutdown timeout, abandoning background tasks");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Trigger `coordinator` on SIGINT/SIGTERM (Ctrl+C elsewhere).
pub async fn handle_signals(coordinator: ShutdownCoordinator) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C");
    }

    coordinator.shutdown();
}
