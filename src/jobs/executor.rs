//! Task dispatch to the package builder and purge worker.

use super::{ProgressReporter, Task, TaskExecutor};
use crate::auth::Actor;
use crate::error::Result;
use crate::package::PackageBuilder;
use crate::purge::PurgeWorker;
use async_trait::async_trait;
use std::sync::Arc;

/// Executes Warden's tasks.
pub struct WardenExecutor {
    builder: Arc<PackageBuilder>,
    purge: Arc<PurgeWorker>,
}

impl WardenExecutor {
    pub fn new(builder: Arc<PackageBuilder>, purge: Arc<PurgeWorker>) -> Self {
        Self { builder, purge }
    }
}

#[async_trait]
impl TaskExecutor for WardenExecutor {
    async fn execute(&self, task: &Task, progress: &ProgressReporter) -> Result<serde_json::Value> {
        match task {
            Task::BuildPackage {
                family_id,
                filter,
                actor,
            } => {
                let report = |percent: u8| progress.report(percent);
                let result = self.builder.build(family_id, filter, actor, &report).await?;
                Ok(serde_json::to_value(result)?)
            }
            Task::PurgeFamily { family_id } => {
                let report = self.purge.purge_family(family_id, &Actor::system()).await?;
                Ok(serde_json::to_value(report)?)
            }
        }
    }
}
