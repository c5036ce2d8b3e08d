//! Deletes old, finished jobs in bounded batches.

use crate::PeriodicTask;
use job_types::{Clock, JobStatus, JobStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionSettings {
    pub retention_days: u32,
    pub batch_size: usize,
    pub interval: Duration,
    /// A sweep stops starting new batches once it has run this long.
    pub max_runtime: Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            retention_days: 10,
            batch_size: 1000,
            interval: Duration::from_secs(3600),
            max_runtime: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub deleted: u64,
    pub batches: u32,
}

pub struct RetentionSweeper {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    settings: RetentionSettings,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        settings: RetentionSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// Delete every non-active job created before the retention window, batch by batch.
    pub async fn sweep_once(&self) -> Result<RetentionReport, StoreError> {
        let started = tokio::time::Instant::now();
        let cutoff =
            self.clock.now() - chrono::Duration::days(i64::from(self.settings.retention_days));
        let active = JobStatus::active_statuses();
        let mut report = RetentionReport::default();

        loop {
            let ids = self
                .store
                .find_jobs_created_before(cutoff, &active, self.settings.batch_size.max(1))
                .await?;
            if ids.is_empty() {
                break;
            }
            let deleted = self.store.delete_jobs(&ids).await?;
            report.batches += 1;
            report.deleted += deleted;
            tracing::debug!(batch = report.batches, deleted, "retention batch deleted");
            if deleted == 0 || started.elapsed() >= self.settings.max_runtime {
                break;
            }
        }

        tracing::info!(
            deleted = report.deleted,
            batches = report.batches,
            cutoff = %cutoff,
            "retention sweep finished"
        );
        Ok(report)
    }

    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let task = PeriodicTask::new("retention-sweep", self.settings.interval);
        task.spawn(token, move || {
            let sweeper = self.clone();
            async move {
                if let Err(e) = sweeper.sweep_once().await {
                    tracing::warn!(error = %e, "retention sweep failed");
                }
            }
        })
    }
}
