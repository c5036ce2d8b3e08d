//! Collaborator traits at the orchestrator's seams, and their errors.

use crate::{
    AgentClientMetadata, Application, Cluster, Command, Criterion, Job, JobEvent, JobRequest,
    JobSpecification, JobStatus, ResolveOutcome, StatusTransition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Read side of the resource registry (clusters, commands, applications).
///
/// Matching methods apply the resource's default status (UP / ACTIVE) to criteria that
/// do not name a status when `add_default_status` is set.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    async fn find_matching_clusters(
        &self,
        criterion: &Criterion,
        add_default_status: bool,
    ) -> Result<Vec<Cluster>, CatalogError>;

    /// Clusters matching at least one of `criteria`, de-duplicated by id.
    async fn find_matching_clusters_any(
        &self,
        criteria: &[Criterion],
        add_default_status: bool,
    ) -> Result<Vec<Cluster>, CatalogError>;

    async fn find_matching_commands(
        &self,
        criterion: &Criterion,
        add_default_status: bool,
    ) -> Result<Vec<Command>, CatalogError>;

    /// Commands attached to a cluster, in the cluster's priority order.
    async fn get_cluster_commands(&self, cluster_id: &str) -> Result<Vec<Command>, CatalogError>;

    async fn get_cluster(&self, id: &str) -> Result<Cluster, CatalogError>;

    async fn get_command(&self, id: &str) -> Result<Command, CatalogError>;

    async fn get_application(&self, id: &str) -> Result<Application, CatalogError>;

    /// Applications a command depends on, in load order.
    async fn get_applications_for_command(
        &self,
        command_id: &str,
    ) -> Result<Vec<Application>, CatalogError>;
}

/// Durable job storage. Every mutating method is atomic per job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in RESERVED. Fails with `IdAlreadyExists` when the id is taken.
    async fn reserve_job(&self, id: &str, request: &JobRequest) -> Result<Job, StoreError>;

    async fn get_job(&self, id: &str) -> Result<Job, StoreError>;

    async fn get_job_status(&self, id: &str) -> Result<JobStatus, StoreError> {
        Ok(self.get_job(id).await?.status)
    }

    /// Apply `transition` only if the job is still in `transition.expected` and active.
    /// Returns the status the job has afterwards; a value other than `transition.new`
    /// means the update was skipped.
    async fn compare_and_set_status(
        &self,
        id: &str,
        transition: &StatusTransition,
    ) -> Result<JobStatus, StoreError>;

    /// Save the resolved specification and move the job to RESOLVED.
    /// Already-resolved jobs are left untouched; non-resolvable ones fail with `InvalidStatus`.
    async fn save_specification(
        &self,
        id: &str,
        specification: &JobSpecification,
    ) -> Result<ResolveOutcome, StoreError>;

    /// Mark the job claimed by an agent and move it to CLAIMED.
    async fn claim_job(&self, id: &str, agent: &AgentClientMetadata) -> Result<(), StoreError>;

    /// Refresh the last-updated timestamp of an active job. Returns its current status.
    async fn touch(&self, id: &str) -> Result<JobStatus, StoreError>;

    /// Ids of active jobs whose last update is older than `updated_before`.
    async fn find_stale_active_jobs(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    /// At most `batch_size` ids of jobs created before `created_before` whose status is not
    /// in `exclude_statuses`.
    async fn find_jobs_created_before(
        &self,
        created_before: DateTime<Utc>,
        exclude_statuses: &BTreeSet<JobStatus>,
        batch_size: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Delete jobs by id; returns how many existed.
    async fn delete_jobs(&self, ids: &[String]) -> Result<u64, StoreError>;

    async fn find_job_ids_by_status(
        &self,
        statuses: &BTreeSet<JobStatus>,
    ) -> Result<Vec<String>, StoreError>;
}

/// Opaque handle on a launched agent process.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    async fn kill(&self) -> Result<(), LaunchError>;

    async fn is_alive(&self) -> bool;

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// What a launcher hands back after starting an agent.
#[derive(Clone, Default)]
pub struct LaunchReceipt {
    pub handle: Option<Arc<dyn AgentHandle>>,
    /// Launcher-specific data worth keeping (e.g. a remote task id).
    pub launcher_ext: Option<serde_json::Value>,
}

impl std::fmt::Debug for LaunchReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchReceipt")
            .field("handle", &self.handle.as_ref().map(|h| h.pid()))
            .field("launcher_ext", &self.launcher_ext)
            .finish()
    }
}

/// Starts an external agent for a resolved job. Does not wait for the job to finish.
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(
        &self,
        job_id: &str,
        specification: &JobSpecification,
    ) -> Result<LaunchReceipt, LaunchError>;

    fn name(&self) -> &str;
}

/// Input handed to cluster load balancers.
#[derive(Debug, Clone)]
pub struct JobRequestContext {
    pub job_id: String,
    pub request: JobRequest,
    /// Candidate cluster id -> the command the job would run there.
    pub cluster_commands: BTreeMap<String, String>,
}

impl JobRequestContext {
    pub fn command_for(&self, cluster_id: &str) -> Option<&str> {
        self.cluster_commands.get(cluster_id).map(String::as_str)
    }
}

/// Picks one cluster among equally eligible candidates.
///
/// Returning `Ok(None)` (or an error) defers to the next balancer in precedence order.
#[async_trait]
pub trait ClusterLoadBalancer: Send + Sync {
    async fn select(
        &self,
        candidates: &[Cluster],
        context: &JobRequestContext,
    ) -> Result<Option<Cluster>, LoadBalancerError>;

    /// Lower runs first.
    fn order(&self) -> i32 {
        0
    }

    fn name(&self) -> &str;
}

/// Outbound lifecycle notifications. Must not block.
pub trait JobEventPublisher: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Time source; lets staleness logic be tested deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource already exists: {0}")]
    IdAlreadyExists(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("catalog error: {0}")]
    Other(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job id already exists: {0}")]
    IdAlreadyExists(String),
    #[error("job {0} is already claimed")]
    AlreadyClaimed(String),
    #[error("job {job_id} is in status {status}: {reason}")]
    InvalidStatus {
        job_id: String,
        status: JobStatus,
        reason: String,
    },
    #[error("job store unavailable: {0}")]
    Unavailable(String),
    #[error("job store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("no match found: {0}")]
    NoMatchFound(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("load balancer: {0}")]
    LoadBalancer(#[from] LoadBalancerError),
}

impl ResolutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolutionError::Catalog(e) if e.is_transient())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadBalancerError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("load balancer timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("load balancer error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("agent launch rejected: {0}")]
    Rejected(String),
    #[error("agent launcher unavailable: {0}")]
    Unavailable(String),
    #[error("agent launch error: {0}")]
    Other(String),
}
