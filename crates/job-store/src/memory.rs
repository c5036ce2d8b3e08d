//! In-memory job store. Every mutation runs under one write lock, which makes the
//! read-compare-write of each conditional update atomic.

use crate::apply;
use chrono::{DateTime, Utc};
use job_types::{
    AgentClientMetadata, Clock, Job, JobRequest, JobSpecification, JobStatus, JobStore,
    ResolveOutcome, StatusTransition, StoreError, SystemClock,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store whose timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: &str) -> StoreError {
    StoreError::NotFound(id.to_string())
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn reserve_job(&self, id: &str, request: &JobRequest) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(id) {
            return Err(StoreError::IdAlreadyExists(id.to_string()));
        }
        let job = Job::reserved(id, request.clone(), self.clock.now());
        jobs.insert(id.to_string(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn get_job_status(&self, id: &str) -> Result<JobStatus, StoreError> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|j| j.status)
            .ok_or_else(|| not_found(id))
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        transition: &StatusTransition,
    ) -> Result<JobStatus, StoreError> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(apply::transition(job, transition, now))
    }

    async fn save_specification(
        &self,
        id: &str,
        specification: &JobSpecification,
    ) -> Result<ResolveOutcome, StoreError> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        apply::save_specification(job, specification, now)
    }

    async fn claim_job(&self, id: &str, agent: &AgentClientMetadata) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        apply::claim(job, agent, now)
    }

    async fn touch(&self, id: &str) -> Result<JobStatus, StoreError> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(apply::touch(job, now))
    }

    async fn find_stale_active_jobs(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut ids: Vec<String> = jobs
            .values()
            .filter(|j| j.status.is_active() && j.updated < updated_before)
            .map(|j| j.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn find_jobs_created_before(
        &self,
        created_before: DateTime<Utc>,
        exclude_statuses: &BTreeSet<JobStatus>,
        batch_size: usize,
    ) -> Result<Vec<String>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut candidates: Vec<&Job> = jobs
            .values()
            .filter(|j| j.created < created_before && !exclude_statuses.contains(&j.status))
            .collect();
        // Oldest first so repeated batches make progress in a stable order.
        candidates.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(candidates
            .into_iter()
            .take(batch_size)
            .map(|j| j.id.clone())
            .collect())
    }

    async fn delete_jobs(&self, ids: &[String]) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write().await;
        let deleted = ids.iter().filter(|id| jobs.remove(*id).is_some()).count();
        Ok(deleted as u64)
    }

    async fn find_job_ids_by_status(
        &self,
        statuses: &BTreeSet<JobStatus>,
    ) -> Result<Vec<String>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut ids: Vec<String> = jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .map(|j| j.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
