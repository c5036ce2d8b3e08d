//! Reserve, resolve, and launch a submitted job.

use crate::retry::{with_backoff, RetryPolicy};
use crate::{AgentRegistry, JobError, JobStateMachine};
use job_resolver::{JobResolver, ResolvedJob};
use job_types::{
    status_messages, AgentLauncher, ClusterStatus, CommandStatus, JobSpecification, JobStatus,
    JobSubmission, ResolutionError,
};
use std::sync::Arc;

/// A job that reached RESOLVED and had its agent started.
#[derive(Debug, Clone)]
pub struct LaunchedJob {
    pub job_id: String,
    pub specification: JobSpecification,
    pub launcher_ext: Option<serde_json::Value>,
}

pub struct JobLaunchService {
    machine: Arc<JobStateMachine>,
    resolver: Arc<JobResolver>,
    launcher: Arc<dyn AgentLauncher>,
    registry: Arc<AgentRegistry>,
    retry: RetryPolicy,
}

impl JobLaunchService {
    pub fn new(
        machine: Arc<JobStateMachine>,
        resolver: Arc<JobResolver>,
        launcher: Arc<dyn AgentLauncher>,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            machine,
            resolver,
            launcher,
            registry,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn launch(&self, submission: &JobSubmission) -> Result<LaunchedJob, JobError> {
        let job = self
            .machine
            .reserve(submission.requested_id.as_deref(), &submission.request)
            .await?;
        let id = job.id;

        let resolved = match self.resolve(&id, &submission.request).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let message = match e {
                    JobError::NoMatchFound(_) | JobError::PreconditionFailed(_) => {
                        status_messages::FAILED_TO_RESOLVE_JOB
                    }
                    _ => status_messages::RESOLUTION_RUNTIME_ERROR,
                };
                tracing::warn!(job_id = %id, error = %e, "job resolution failed");
                self.fail(&id, JobStatus::Reserved, message).await;
                return Err(e);
            }
        };

        if let Err(e) = self.second_check(&resolved).await {
            tracing::warn!(job_id = %id, error = %e, "resolved resources changed before commit");
            self.fail(&id, JobStatus::Reserved, status_messages::RESOURCES_CHANGED)
                .await;
            return Err(e);
        }

        let specification = resolved.specification;
        with_backoff(self.retry, "save specification", || {
            self.machine.resolve(&id, &specification)
        })
        .await?;

        match self.launcher.launch(&id, &specification).await {
            Ok(receipt) => {
                if let Some(handle) = receipt.handle {
                    self.registry.insert(&id, handle).await;
                }
                tracing::info!(job_id = %id, launcher = self.launcher.name(), "job launched");
                Ok(LaunchedJob {
                    job_id: id,
                    specification,
                    launcher_ext: receipt.launcher_ext,
                })
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "agent launch failed");
                let message = format!("{}: {}", status_messages::FAILED_TO_LAUNCH_AGENT, e);
                self.fail(&id, JobStatus::Resolved, &message).await;
                Err(e.into())
            }
        }
    }

    async fn resolve(
        &self,
        id: &str,
        request: &job_types::JobRequest,
    ) -> Result<ResolvedJob, JobError> {
        with_backoff(self.retry, "resolve job", || self.resolver.resolve(id, request))
            .await
            .map_err(JobError::from)
    }

    /// Re-read the chosen cluster and command; both must still exist and be usable.
    async fn second_check(&self, resolved: &ResolvedJob) -> Result<(), JobError> {
        let catalog = self.resolver.catalog();
        let cluster = catalog
            .get_cluster(&resolved.cluster.id)
            .await
            .map_err(ResolutionError::from)?;
        if cluster.status != ClusterStatus::DEFAULT_FILTER {
            return Err(JobError::NoMatchFound(format!(
                "cluster {} is now {}",
                cluster.id, cluster.status
            )));
        }
        let command = catalog
            .get_command(&resolved.command.id)
            .await
            .map_err(ResolutionError::from)?;
        if command.status != CommandStatus::DEFAULT_FILTER {
            return Err(JobError::NoMatchFound(format!(
                "command {} is now {}",
                command.id, command.status
            )));
        }
        Ok(())
    }

    /// Best-effort move to FAILED; the job may already have moved on.
    async fn fail(&self, id: &str, expected: JobStatus, message: &str) {
        let result = with_backoff(self.retry, "fail job", || {
            self.machine
                .update_status(id, expected, JobStatus::Failed, Some(message))
        })
        .await;
        match result {
            Ok(JobStatus::Failed) => {}
            Ok(actual) => {
                tracing::debug!(job_id = %id, actual = %actual, "job left state before it could be failed");
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "unable to mark job failed");
            }
        }
    }
}
