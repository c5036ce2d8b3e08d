//! Killing jobs on request.

use crate::{AgentRegistry, JobError, JobStateMachine};
use job_types::{status_messages, JobStatus};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Killed,
    /// The job had already reached this terminal status.
    AlreadyFinished(JobStatus),
}

pub struct JobKillService {
    machine: Arc<JobStateMachine>,
    registry: Arc<AgentRegistry>,
    max_attempts: u32,
}

impl JobKillService {
    pub fn new(machine: Arc<JobStateMachine>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            machine,
            registry,
            max_attempts: 5,
        }
    }

    /// Move the job to KILLED, competing with other writers via CAS, then signal its agent.
    pub async fn kill(&self, id: &str, reason: Option<&str>) -> Result<KillOutcome, JobError> {
        let reason = reason.unwrap_or(status_messages::KILLED_BY_USER);
        let mut observed = self.machine.get_status(id).await?;
        for _ in 0..self.max_attempts {
            if observed.is_terminal() {
                tracing::debug!(job_id = %id, status = %observed, "kill requested for finished job");
                return Ok(KillOutcome::AlreadyFinished(observed));
            }
            let actual = self
                .machine
                .update_status(id, observed, JobStatus::Killed, Some(reason))
                .await?;
            if actual == JobStatus::Killed {
                self.signal_agent(id).await;
                return Ok(KillOutcome::Killed);
            }
            // Someone else moved the job; try again from where it is now.
            observed = actual;
        }
        Err(JobError::InvalidStatus {
            job_id: id.to_string(),
            status: observed,
            reason: "job kept changing status while being killed".to_string(),
        })
    }

    async fn signal_agent(&self, id: &str) {
        let Some(handle) = self.registry.remove(id).await else {
            return;
        };
        if let Err(e) = handle.kill().await {
            tracing::warn!(job_id = %id, error = %e, "failed to signal agent");
        }
    }
}
