//! Detects active jobs whose heartbeats stopped and fails them.

use crate::{JobStateMachine, PeriodicTask};
use job_types::{status_messages, Clock, JobStatus, StatusTransition, ZOMBIE_EXIT_CODE};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct ReaperSettings {
    /// How long an active job may go without an update.
    pub threshold: Duration,
    pub interval: Duration,
    pub jitter: Duration,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(30 * 60),
            interval: Duration::from_secs(45),
            jitter: Duration::from_secs(15),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub examined: usize,
    pub reaped: usize,
    /// Jobs that moved on (or recovered) between the scan and the update.
    pub lost_races: usize,
    pub failed: usize,
}

pub struct ZombieReaper {
    machine: Arc<JobStateMachine>,
    clock: Arc<dyn Clock>,
    settings: ReaperSettings,
}

impl ZombieReaper {
    pub fn new(
        machine: Arc<JobStateMachine>,
        clock: Arc<dyn Clock>,
        settings: ReaperSettings,
    ) -> Self {
        Self {
            machine,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ReaperSettings {
        &self.settings
    }

    pub async fn reap_once(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let threshold = match chrono::Duration::from_std(self.settings.threshold) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "zombie threshold out of range");
                return report;
            }
        };
        let cutoff = self.clock.now() - threshold;

        let ids = match self.machine.store().find_stale_active_jobs(cutoff).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "failed to scan for zombie jobs");
                report.failed += 1;
                return report;
            }
        };

        for id in ids {
            report.examined += 1;
            // Re-read: the job may have heartbeated or finished since the scan.
            let job = match self.machine.get(&id).await {
                Ok(job) => job,
                Err(crate::JobError::NotFound(_)) => {
                    report.lost_races += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "failed to re-read zombie candidate");
                    report.failed += 1;
                    continue;
                }
            };
            if !job.status.is_active() || job.updated >= cutoff {
                report.lost_races += 1;
                continue;
            }

            let transition = StatusTransition::new(job.status, JobStatus::Failed)
                .with_message(status_messages::ZOMBIE_JOB)
                .with_exit_code(ZOMBIE_EXIT_CODE)
                .with_updated_before(cutoff);
            match self.machine.transition(&id, transition).await {
                Ok(JobStatus::Failed) => {
                    tracing::info!(
                        job_id = %id,
                        observed = %job.status,
                        last_update = %job.updated,
                        "marked zombie job as failed"
                    );
                    report.reaped += 1;
                }
                Ok(actual) => {
                    tracing::debug!(job_id = %id, actual = %actual, "zombie candidate changed concurrently");
                    report.lost_races += 1;
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "failed to reap zombie job");
                    report.failed += 1;
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                reaped = report.reaped,
                lost_races = report.lost_races,
                failed = report.failed,
                "zombie sweep finished"
            );
        }
        report
    }

    /// Sweep on a jittered interval until `token` is cancelled.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let task = PeriodicTask::new("zombie-reaper", self.settings.interval)
            .with_jitter(self.settings.jitter);
        task.spawn(token, move || {
            let reaper = self.clone();
            async move {
                reaper.reap_once().await;
            }
        })
    }
}
