//! Transition requests, outcomes, and lifecycle events.

use crate::{JobSpecification, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A compare-and-set status change: applied only if the job is still in `expected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub expected: JobStatus,
    pub new: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Also require the job's last update to be older than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_before: Option<DateTime<Utc>>,
}

impl StatusTransition {
    pub fn new(expected: JobStatus, new: JobStatus) -> Self {
        Self {
            expected,
            new,
            message: None,
            exit_code: None,
            updated_before: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    /// Skip the change if the job was updated at or after `cutoff`, e.g. by a heartbeat.
    pub fn with_updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }
}

/// Result of saving a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The specification was saved and the job moved to RESOLVED.
    Saved,
    /// The job was already resolved; nothing changed.
    AlreadyResolved,
}

/// Published whenever the orchestrator changes a job's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    StatusChanged {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        at: DateTime<Utc>,
    },
    Resolved {
        job_id: String,
        specification: JobSpecification,
        at: DateTime<Utc>,
    },
    /// The job reached a terminal status. Notifiers (e.g. email) subscribe to this.
    Finished {
        job_id: String,
        status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::StatusChanged { job_id, .. }
            | JobEvent::Resolved { job_id, .. }
            | JobEvent::Finished { job_id, .. } => job_id,
        }
    }
}
