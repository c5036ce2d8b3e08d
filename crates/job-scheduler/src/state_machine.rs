//! Job status transitions on top of the job store's conditional updates.
//!
//! Nothing here holds a lock across a store call: every rule about "the job must still be
//! in X" is enforced by the store when it applies the write. The machine adds request
//! validation, edge legality, message truncation, and event publication.

use crate::JobError;
use job_types::{
    AgentClientMetadata, Clock, Job, JobEvent, JobEventPublisher, JobRequest, JobSpecification,
    JobStatus, JobStore, ResolveOutcome, StatusTransition,
};
use std::sync::Arc;

/// Default cap on stored status messages, in characters.
pub const DEFAULT_MAX_STATUS_MESSAGE_LEN: usize = 255;

pub struct JobStateMachine {
    store: Arc<dyn JobStore>,
    events: Arc<dyn JobEventPublisher>,
    clock: Arc<dyn Clock>,
    max_message_len: usize,
}

impl JobStateMachine {
    pub fn new(
        store: Arc<dyn JobStore>,
        events: Arc<dyn JobEventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            max_message_len: DEFAULT_MAX_STATUS_MESSAGE_LEN,
        }
    }

    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Create a job in RESERVED. A fresh v4 UUID is used when no id is requested.
    pub async fn reserve(
        &self,
        requested_id: Option<&str>,
        request: &JobRequest,
    ) -> Result<Job, JobError> {
        request.validate().map_err(JobError::PreconditionFailed)?;
        let id = match requested_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let job = self.store.reserve_job(&id, request).await?;
        tracing::info!(job_id = %id, user = %request.metadata.user, "job reserved");
        Ok(job)
    }

    /// Persist the resolved specification. Repeating it for a resolved job changes nothing.
    pub async fn resolve(
        &self,
        id: &str,
        specification: &JobSpecification,
    ) -> Result<ResolveOutcome, JobError> {
        let outcome = self.store.save_specification(id, specification).await?;
        match outcome {
            ResolveOutcome::Saved => {
                let at = self.clock.now();
                self.events.publish(JobEvent::Resolved {
                    job_id: id.to_string(),
                    specification: specification.clone(),
                    at,
                });
                self.events.publish(JobEvent::StatusChanged {
                    job_id: id.to_string(),
                    from: JobStatus::Reserved,
                    to: JobStatus::Resolved,
                    message: None,
                    at,
                });
                tracing::info!(job_id = %id, cluster_id = %specification.cluster_id, "job resolved");
            }
            ResolveOutcome::AlreadyResolved => {
                tracing::debug!(job_id = %id, "job already resolved; ignoring");
            }
        }
        Ok(outcome)
    }

    pub async fn claim(&self, id: &str, agent: &AgentClientMetadata) -> Result<(), JobError> {
        self.store.claim_job(id, agent).await?;
        self.events.publish(JobEvent::StatusChanged {
            job_id: id.to_string(),
            from: JobStatus::Resolved,
            to: JobStatus::Claimed,
            message: None,
            at: self.clock.now(),
        });
        tracing::info!(job_id = %id, hostname = ?agent.hostname, "job claimed");
        Ok(())
    }

    /// Compare-and-set status change. Returns the job's status afterwards: `new` when the
    /// change applied, otherwise whatever the job actually is.
    ///
    /// A job that is no longer in `expected`, or that already finished, is left alone and its
    /// actual status returned. Only a job that really is in `expected` can be refused, with
    /// `InvalidStatus`, for a RESERVED/RESOLVED/CLAIMED target or an illegal edge.
    pub async fn update_status(
        &self,
        id: &str,
        expected: JobStatus,
        new: JobStatus,
        message: Option<&str>,
    ) -> Result<JobStatus, JobError> {
        let mut transition = StatusTransition::new(expected, new);
        transition.message = message.map(str::to_string);
        self.transition(id, transition).await
    }

    /// Like [`update_status`](Self::update_status) with the full transition, exit code included.
    pub async fn transition(
        &self,
        id: &str,
        mut transition: StatusTransition,
    ) -> Result<JobStatus, JobError> {
        let (expected, new) = (transition.expected, transition.new);
        if expected == new {
            return Ok(new);
        }
        // A stale expectation or a finished job is a lost race, not a caller error.
        let actual = self.store.get_job_status(id).await?;
        if actual != expected || !actual.is_active() {
            tracing::debug!(
                job_id = %id,
                expected = %expected,
                requested = %new,
                actual = %actual,
                "status update skipped"
            );
            return Ok(actual);
        }
        if matches!(
            new,
            JobStatus::Reserved | JobStatus::Resolved | JobStatus::Claimed
        ) {
            return Err(JobError::InvalidStatus {
                job_id: id.to_string(),
                status: new,
                reason: "status can only be reached through reserve, resolve, or claim"
                    .to_string(),
            });
        }
        if !expected.can_transition_to(new) {
            return Err(JobError::InvalidStatus {
                job_id: id.to_string(),
                status: expected,
                reason: format!("illegal transition {} -> {}", expected, new),
            });
        }
        transition.message = transition
            .message
            .map(|m| truncate(&m, self.max_message_len));

        let actual = self.store.compare_and_set_status(id, &transition).await?;
        if actual != new {
            tracing::debug!(
                job_id = %id,
                expected = %expected,
                requested = %new,
                actual = %actual,
                "status update skipped"
            );
            return Ok(actual);
        }

        let at = self.clock.now();
        self.events.publish(JobEvent::StatusChanged {
            job_id: id.to_string(),
            from: expected,
            to: new,
            message: transition.message.clone(),
            at,
        });
        if new.is_terminal() {
            self.events.publish(JobEvent::Finished {
                job_id: id.to_string(),
                status: new,
                message: transition.message.clone(),
                at,
            });
        }
        tracing::info!(job_id = %id, from = %expected, to = %new, "job status changed");
        Ok(actual)
    }

    /// Refresh the job's last-updated time. Terminal jobs are left as they are.
    pub async fn heartbeat(&self, id: &str) -> Result<JobStatus, JobError> {
        Ok(self.store.touch(id).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Job, JobError> {
        Ok(self.store.get_job(id).await?)
    }

    pub async fn get_status(&self, id: &str) -> Result<JobStatus, JobError> {
        Ok(self.store.get_job_status(id).await?)
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
