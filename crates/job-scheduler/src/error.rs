//! Errors surfaced by the scheduler services.

use job_types::{JobStatus, LaunchError, ResolutionError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("no match found: {0}")]
    NoMatchFound(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("job {job_id} is in status {status}: {reason}")]
    InvalidStatus {
        job_id: String,
        status: JobStatus,
        reason: String,
    },
    #[error("job {0} is already claimed")]
    AlreadyClaimed(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job id already exists: {0}")]
    IdAlreadyExists(String),
    #[error("store: {0}")]
    Store(StoreError),
    #[error("resolution: {0}")]
    Resolution(ResolutionError),
    #[error("launch: {0}")]
    Launch(#[from] LaunchError),
}

impl JobError {
    pub fn is_transient(&self) -> bool {
        match self {
            JobError::Store(e) => e.is_transient(),
            JobError::Resolution(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => JobError::NotFound(id),
            StoreError::IdAlreadyExists(id) => JobError::IdAlreadyExists(id),
            StoreError::AlreadyClaimed(id) => JobError::AlreadyClaimed(id),
            StoreError::InvalidStatus {
                job_id,
                status,
                reason,
            } => JobError::InvalidStatus {
                job_id,
                status,
                reason,
            },
            other => JobError::Store(other),
        }
    }
}

impl From<ResolutionError> for JobError {
    fn from(e: ResolutionError) -> Self {
        match e {
            ResolutionError::NoMatchFound(msg) => JobError::NoMatchFound(msg),
            ResolutionError::PreconditionFailed(msg) => JobError::PreconditionFailed(msg),
            other => JobError::Resolution(other),
        }
    }
}
