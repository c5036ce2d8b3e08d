//! Guarded mutations shared by every store backend.
//!
//! Each function inspects the job as currently stored and either mutates it or reports
//! why it cannot. Callers must run them under whatever makes the read-modify-write atomic
//! for their backend (a write lock, a transaction).

use chrono::{DateTime, Utc};
use job_types::{
    status_messages, AgentClientMetadata, Job, JobSpecification, JobStatus, ResolveOutcome,
    StatusTransition, StoreError,
};

/// Compare-and-set on the job's status. Returns the status the job holds afterwards.
pub(crate) fn transition(job: &mut Job, t: &StatusTransition, now: DateTime<Utc>) -> JobStatus {
    if job.status != t.expected || !job.status.is_active() {
        return job.status;
    }
    if t.updated_before.is_some_and(|cutoff| job.updated >= cutoff) {
        return job.status;
    }
    job.status = t.new;
    job.status_message = t.message.clone();
    job.updated = now;
    if t.new == JobStatus::Running && job.started.is_none() {
        job.started = Some(now);
    }
    if t.new.is_finished() && job.started.is_some() {
        job.finished = Some(now);
    }
    if t.exit_code.is_some() {
        job.exit_code = t.exit_code;
    }
    job.status
}

pub(crate) fn save_specification(
    job: &mut Job,
    specification: &JobSpecification,
    now: DateTime<Utc>,
) -> Result<ResolveOutcome, StoreError> {
    if job.resolved {
        return Ok(ResolveOutcome::AlreadyResolved);
    }
    if !job.status.is_resolvable() {
        return Err(StoreError::InvalidStatus {
            job_id: job.id.clone(),
            status: job.status,
            reason: "job is not resolvable".to_string(),
        });
    }
    job.specification = Some(specification.clone());
    job.resolved = true;
    job.status = JobStatus::Resolved;
    job.status_message = Some(status_messages::RESOLVED.to_string());
    job.updated = now;
    Ok(ResolveOutcome::Saved)
}

pub(crate) fn claim(
    job: &mut Job,
    agent: &AgentClientMetadata,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if job.claimed {
        return Err(StoreError::AlreadyClaimed(job.id.clone()));
    }
    if !job.status.is_claimable() {
        return Err(StoreError::InvalidStatus {
            job_id: job.id.clone(),
            status: job.status,
            reason: "job is not claimable".to_string(),
        });
    }
    job.claimed = true;
    job.agent = Some(agent.clone());
    job.status = JobStatus::Claimed;
    job.status_message = Some(status_messages::CLAIMED.to_string());
    job.updated = now;
    Ok(())
}

/// Heartbeat: only active jobs have their last-updated time refreshed.
pub(crate) fn touch(job: &mut Job, now: DateTime<Utc>) -> JobStatus {
    if job.status.is_active() {
        job.updated = now;
    }
    job.status
}
