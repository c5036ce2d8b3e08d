//! Job aggregate, its status lifecycle, requests, and resolved specifications.

use crate::Criterion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Lifecycle of a job.
///
/// `RESERVED → RESOLVED → CLAIMED → INIT → RUNNING → {SUCCEEDED, FAILED, KILLED}`, and any
/// active status may jump straight to a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Reserved,
    Resolved,
    Claimed,
    Init,
    Running,
    Succeeded,
    Failed,
    Killed,
    Invalid,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Reserved,
        JobStatus::Resolved,
        JobStatus::Claimed,
        JobStatus::Init,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Killed,
        JobStatus::Invalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Reserved => "RESERVED",
            JobStatus::Resolved => "RESOLVED",
            JobStatus::Claimed => "CLAIMED",
            JobStatus::Init => "INIT",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Killed => "KILLED",
            JobStatus::Invalid => "INVALID",
        }
    }

    /// Only a reserved job can have its specification saved.
    pub fn is_resolvable(&self) -> bool {
        matches!(self, JobStatus::Reserved)
    }

    /// Only a resolved job can be claimed by an agent.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Resolved)
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Reserved
                | JobStatus::Resolved
                | JobStatus::Claimed
                | JobStatus::Init
                | JobStatus::Running
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Killed
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn active_statuses() -> BTreeSet<JobStatus> {
        Self::ALL.into_iter().filter(JobStatus::is_active).collect()
    }

    pub fn finished_statuses() -> BTreeSet<JobStatus> {
        Self::ALL.into_iter().filter(JobStatus::is_finished).collect()
    }

    /// Whether `self → next` is an edge of the lifecycle graph.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if !self.is_active() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        matches!(
            (self, next),
            (JobStatus::Reserved, JobStatus::Resolved)
                | (JobStatus::Resolved, JobStatus::Claimed)
                | (JobStatus::Claimed, JobStatus::Init)
                | (JobStatus::Init, JobStatus::Running)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| crate::UnknownStatus {
                kind: "job",
                value: s.to_string(),
            })
    }
}

/// Fixed status messages written by the orchestrator itself.
pub mod status_messages {
    pub const RESERVED: &str = "Job reserved";
    pub const RESOLVED: &str = "Job resolved";
    pub const CLAIMED: &str = "Job claimed by agent";
    pub const FAILED_TO_RESOLVE_JOB: &str =
        "Failed to resolve job given original request and available resources";
    pub const RESOLUTION_RUNTIME_ERROR: &str = "Runtime error during job resolution";
    pub const RESOURCES_CHANGED: &str =
        "Resolved cluster or command is no longer available to run the job";
    pub const FAILED_TO_LAUNCH_AGENT: &str = "Failed to launch agent";
    pub const ZOMBIE_JOB: &str = "Job has been marked as a zombie";
    pub const KILLED_BY_USER: &str = "Job was killed by user";
}

/// Exit code recorded for jobs reaped as zombies.
pub const ZOMBIE_EXIT_CODE: i32 = 212;

/// Descriptive metadata about a job request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping_instance: Option<String>,
}

impl JobMetadata {
    pub fn new(name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user: user.into(),
            version: String::new(),
            description: None,
            tags: BTreeSet::new(),
            group: None,
            grouping: None,
            grouping_instance: None,
        }
    }
}

/// What the job asks to run on: ordered cluster criteria, one command criterion, optional apps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResourceCriteria {
    /// Tried in order; the first criterion with a usable match wins.
    pub cluster_criteria: Vec<Criterion>,
    pub command_criterion: Criterion,
    #[serde(default)]
    pub application_ids: Vec<String>,
}

/// Resources the user requested for the job's environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestedJobEnvironment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
}

/// Agent-side settings the user requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestedAgentConfig {
    /// Wall-clock budget for the RUNNING phase, handed to the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_directory: Option<PathBuf>,
}

/// A job request as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub metadata: JobMetadata,
    pub criteria: ExecutionResourceCriteria,
    #[serde(default)]
    pub command_args: Vec<String>,
    #[serde(default)]
    pub environment: RequestedJobEnvironment,
    #[serde(default)]
    pub agent_config: RequestedAgentConfig,
}

impl JobRequest {
    pub fn new(metadata: JobMetadata, criteria: ExecutionResourceCriteria) -> Self {
        Self {
            metadata,
            criteria,
            command_args: Vec::new(),
            environment: RequestedJobEnvironment::default(),
            agent_config: RequestedAgentConfig::default(),
        }
    }

    /// Reject requests that could never resolve: no cluster criteria or empty criteria.
    pub fn validate(&self) -> Result<(), String> {
        if self.criteria.cluster_criteria.is_empty() {
            return Err("job request must contain at least one cluster criterion".to_string());
        }
        if self.criteria.cluster_criteria.iter().any(Criterion::is_empty) {
            return Err("cluster criteria must not be empty".to_string());
        }
        if self.criteria.command_criterion.is_empty() {
            return Err("command criterion must not be empty".to_string());
        }
        if self.metadata.user.trim().is_empty() {
            return Err("job request must name a user".to_string());
        }
        Ok(())
    }
}

/// A request plus the optional caller-chosen id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_id: Option<String>,
    pub request: JobRequest,
}

/// CPU and memory computed for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    pub memory_mb: u32,
}

/// Immutable resolution result: what to run and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpecification {
    pub cluster_id: String,
    pub command_id: String,
    #[serde(default)]
    pub application_ids: Vec<String>,
    /// Command executable, its fixed arguments, then the job's arguments.
    #[serde(default)]
    pub command_args: Vec<String>,
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
    pub job_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub compute: ComputeResources,
}

/// What an agent reports about itself when claiming a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentClientMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// The job aggregate as stored by the persistence gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub resolved: bool,
    pub claimed: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub request: JobRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specification: Option<JobSpecification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentClientMetadata>,
}

impl Job {
    /// Fresh job in RESERVED, stamped at `now`.
    pub fn reserved(id: impl Into<String>, request: JobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Reserved,
            status_message: Some(status_messages::RESERVED.to_string()),
            resolved: false,
            claimed: false,
            created: now,
            updated: now,
            started: None,
            finished: None,
            exit_code: None,
            request,
            specification: None,
            agent: None,
        }
    }
}
