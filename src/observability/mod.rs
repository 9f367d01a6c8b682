//! Observability for Warden.
//!
//! Structured logging via `tracing` and Prometheus metrics via the `metrics` facade.

use crate::config::ObservabilityConfig;
use crate::error::{Result, WardenError};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| WardenError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| WardenError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Install the Prometheus recorder. The handle renders the `/metrics` body.
pub fn install_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| WardenError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();
    Ok(handle)
}

/// Describe Warden's metrics so they are exported before their first increment.
fn register_metrics() {
    describe_counter!("warden_custody_events_total", "Custody events appended, by action");
    describe_counter!("warden_purged_total", "Evidence items permanently purged");
    describe_counter!("warden_packages_built_total", "Evidence packages built and signed");
    describe_counter!("warden_jobs_total", "Background jobs finished, by final state");

    counter!("warden_purged_total").absolute(0);
    counter!("warden_packages_built_total").absolute(0);
}
