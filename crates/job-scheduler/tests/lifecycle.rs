//! Lifecycle tests across the state machine, reaper, and store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_scheduler::{
    BroadcastEventPublisher, JobError, JobStateMachine, NoopEventPublisher, ReaperSettings,
    ZombieReaper,
};
use job_store::InMemoryJobStore;
use job_types::{
    AgentClientMetadata, ComputeResources, Criterion, ExecutionResourceCriteria, Job, JobEvent,
    JobMetadata, JobRequest, JobSpecification, JobStatus, JobStore, ManualClock, ResolveOutcome,
    StatusTransition, StoreError,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

fn request() -> JobRequest {
    JobRequest::new(
        JobMetadata::new("nightly", "alice"),
        ExecutionResourceCriteria {
            cluster_criteria: vec![Criterion::with_tags(["prod"]).unwrap()],
            command_criterion: Criterion::builder().name("spark-submit").build().unwrap(),
            application_ids: vec![],
        },
    )
}

fn spec(cluster: &str) -> JobSpecification {
    JobSpecification {
        cluster_id: cluster.into(),
        command_id: "spark".into(),
        application_ids: vec![],
        command_args: vec!["spark-submit".into()],
        environment_variables: Default::default(),
        job_directory: PathBuf::from("/tmp/jobs/j1"),
        archive_location: None,
        timeout_secs: None,
        compute: ComputeResources {
            cpu: None,
            memory_mb: 1536,
        },
    }
}

async fn to_running(machine: &JobStateMachine, id: &str) {
    machine.reserve(Some(id), &request()).await.unwrap();
    machine.resolve(id, &spec("A")).await.unwrap();
    machine
        .claim(id, &AgentClientMetadata::default())
        .await
        .unwrap();
    machine
        .update_status(id, JobStatus::Claimed, JobStatus::Init, None)
        .await
        .unwrap();
    machine
        .update_status(id, JobStatus::Init, JobStatus::Running, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn resolving_twice_keeps_first_specification() {
    let machine = JobStateMachine::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(NoopEventPublisher),
        Arc::new(job_types::SystemClock),
    );
    machine.reserve(Some("j1"), &request()).await.unwrap();
    assert_eq!(
        machine.resolve("j1", &spec("A")).await.unwrap(),
        ResolveOutcome::Saved
    );
    assert_eq!(
        machine.resolve("j1", &spec("B")).await.unwrap(),
        ResolveOutcome::AlreadyResolved
    );
    let job = machine.get("j1").await.unwrap();
    assert_eq!(job.status, JobStatus::Resolved);
    assert_eq!(job.specification.unwrap().cluster_id, "A");
}

#[tokio::test]
async fn concurrent_terminal_updates_have_one_winner() {
    let machine = Arc::new(JobStateMachine::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(NoopEventPublisher),
        Arc::new(job_types::SystemClock),
    ));
    to_running(&machine, "j1").await;

    let mut tasks = Vec::new();
    for target in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Killed] {
        let machine = machine.clone();
        tasks.push(tokio::spawn(async move {
            let actual = machine
                .update_status("j1", JobStatus::Running, target, None)
                .await
                .unwrap();
            (target, actual)
        }));
    }
    let mut outcomes = Vec::new();
    for t in tasks {
        outcomes.push(t.await.unwrap());
    }
    let winners: Vec<_> = outcomes.iter().filter(|(t, a)| t == a).collect();
    assert_eq!(winners.len(), 1);
    let final_status = machine.get_status("j1").await.unwrap();
    assert_eq!(final_status, winners[0].0);
    // Losers observed the winner's status.
    assert!(outcomes.iter().all(|(_, a)| *a == final_status));
}

#[tokio::test]
async fn terminal_jobs_never_change_again() {
    let machine = JobStateMachine::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(NoopEventPublisher),
        Arc::new(job_types::SystemClock),
    );
    to_running(&machine, "j1").await;
    machine
        .update_status("j1", JobStatus::Running, JobStatus::Succeeded, None)
        .await
        .unwrap();
    for target in [JobStatus::Failed, JobStatus::Killed] {
        assert_eq!(
            machine
                .update_status("j1", JobStatus::Running, target, None)
                .await
                .unwrap(),
            JobStatus::Succeeded
        );
    }
    let finished = machine.get("j1").await.unwrap().finished;
    // Even a caller that "knows" the terminal status cannot move the job on.
    for (expected, target) in [
        (JobStatus::Succeeded, JobStatus::Running),
        (JobStatus::Succeeded, JobStatus::Failed),
    ] {
        assert_eq!(
            machine
                .update_status("j1", expected, target, None)
                .await
                .unwrap(),
            JobStatus::Succeeded
        );
    }
    assert_eq!(machine.get("j1").await.unwrap().finished, finished);
}

#[tokio::test]
async fn stale_expected_status_reports_actual_without_error() {
    let machine = JobStateMachine::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(NoopEventPublisher),
        Arc::new(job_types::SystemClock),
    );
    machine.reserve(Some("j1"), &request()).await.unwrap();
    machine.resolve("j1", &spec("A")).await.unwrap();

    // The caller still believes the job is CLAIMED; INIT is legal from there, but the job
    // never got that far.
    assert_eq!(
        machine
            .update_status("j1", JobStatus::Claimed, JobStatus::Init, None)
            .await
            .unwrap(),
        JobStatus::Resolved
    );
    // An edge that would be illegal from the stale status is still just a lost race.
    assert_eq!(
        machine
            .update_status("j1", JobStatus::Reserved, JobStatus::Running, None)
            .await
            .unwrap(),
        JobStatus::Resolved
    );
    assert_eq!(
        machine.get_status("j1").await.unwrap(),
        JobStatus::Resolved
    );
    // Against the real status the same illegal edge is refused.
    assert!(matches!(
        machine
            .update_status("j1", JobStatus::Resolved, JobStatus::Running, None)
            .await,
        Err(JobError::InvalidStatus { .. })
    ));
}

#[tokio::test]
async fn start_and_finish_times_are_stamped_once() {
    let clock = Arc::new(ManualClock::default());
    let machine = JobStateMachine::new(
        Arc::new(InMemoryJobStore::with_clock(clock.clone())),
        Arc::new(NoopEventPublisher),
        clock.clone(),
    );
    to_running(&machine, "j1").await;
    let started = machine.get("j1").await.unwrap().started;
    assert!(started.is_some());

    clock.advance(chrono::Duration::minutes(5));
    // Re-entering RUNNING through the store's CAS keeps the first start time.
    let again = StatusTransition::new(JobStatus::Running, JobStatus::Running);
    assert_eq!(
        machine
            .store()
            .compare_and_set_status("j1", &again)
            .await
            .unwrap(),
        JobStatus::Running
    );
    assert_eq!(machine.get("j1").await.unwrap().started, started);
    // So does a late INIT -> RUNNING from a confused agent.
    assert_eq!(
        machine
            .update_status("j1", JobStatus::Init, JobStatus::Running, None)
            .await
            .unwrap(),
        JobStatus::Running
    );
    assert_eq!(machine.get("j1").await.unwrap().started, started);

    machine
        .update_status("j1", JobStatus::Running, JobStatus::Succeeded, None)
        .await
        .unwrap();
    let finished = machine.get("j1").await.unwrap().finished;
    assert!(finished.is_some());

    clock.advance(chrono::Duration::minutes(5));
    let late = StatusTransition::new(JobStatus::Running, JobStatus::Failed);
    assert_eq!(
        machine
            .store()
            .compare_and_set_status("j1", &late)
            .await
            .unwrap(),
        JobStatus::Succeeded
    );
    let job = machine.get("j1").await.unwrap();
    assert_eq!(job.started, started);
    assert_eq!(job.finished, finished);
}

#[tokio::test]
async fn reaper_fails_stale_running_job_and_publishes() {
    let clock = Arc::new(ManualClock::default());
    let events = Arc::new(BroadcastEventPublisher::new(64));
    let machine = Arc::new(JobStateMachine::new(
        Arc::new(InMemoryJobStore::with_clock(clock.clone())),
        events.clone(),
        clock.clone(),
    ));
    to_running(&machine, "stale").await;
    to_running(&machine, "alive").await;
    let mut rx = events.subscribe();

    clock.advance(chrono::Duration::minutes(29));
    machine.heartbeat("alive").await.unwrap();
    clock.advance(chrono::Duration::minutes(2));

    let reaper = ZombieReaper::new(machine.clone(), clock.clone(), ReaperSettings::default());
    let report = reaper.reap_once().await;
    assert_eq!(report.reaped, 1);
    assert_eq!(report.failed, 0);

    let stale = machine.get("stale").await.unwrap();
    assert_eq!(stale.status, JobStatus::Failed);
    assert_eq!(stale.exit_code, Some(212));
    assert!(stale.finished.is_some());
    assert_eq!(
        machine.get_status("alive").await.unwrap(),
        JobStatus::Running
    );

    let mut finished = None;
    while let Ok(event) = rx.try_recv() {
        if let JobEvent::Finished { job_id, status, .. } = event {
            finished = Some((job_id, status));
        }
    }
    assert_eq!(finished, Some(("stale".to_string(), JobStatus::Failed)));
}

/// What the agent does while the reaper is working.
#[derive(Clone, Copy)]
enum Race {
    /// Finishes the job right after the reaper's scan.
    FinishAfterScan,
    /// Heartbeats right after the reaper re-reads the job.
    HeartbeatAfterRead,
}

/// In-memory store that lets a simulated agent act between the reaper's steps.
struct RacingStore {
    inner: InMemoryJobStore,
    race: Race,
}

#[async_trait]
impl JobStore for RacingStore {
    async fn reserve_job(&self, id: &str, request: &JobRequest) -> Result<Job, StoreError> {
        self.inner.reserve_job(id, request).await
    }

    async fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        let job = self.inner.get_job(id).await?;
        if let Race::HeartbeatAfterRead = self.race {
            self.inner.touch(id).await?;
        }
        Ok(job)
    }

    async fn get_job_status(&self, id: &str) -> Result<JobStatus, StoreError> {
        self.inner.get_job_status(id).await
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        transition: &StatusTransition,
    ) -> Result<JobStatus, StoreError> {
        self.inner.compare_and_set_status(id, transition).await
    }

    async fn save_specification(
        &self,
        id: &str,
        specification: &JobSpecification,
    ) -> Result<ResolveOutcome, StoreError> {
        self.inner.save_specification(id, specification).await
    }

    async fn claim_job(&self, id: &str, agent: &AgentClientMetadata) -> Result<(), StoreError> {
        self.inner.claim_job(id, agent).await
    }

    async fn touch(&self, id: &str) -> Result<JobStatus, StoreError> {
        self.inner.touch(id).await
    }

    async fn find_stale_active_jobs(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let ids = self.inner.find_stale_active_jobs(updated_before).await?;
        if let Race::HeartbeatAfterRead = self.race {
            return Ok(ids);
        }
        for id in &ids {
            self.inner
                .compare_and_set_status(
                    id,
                    &StatusTransition::new(JobStatus::Running, JobStatus::Succeeded),
                )
                .await?;
        }
        Ok(ids)
    }

    async fn find_jobs_created_before(
        &self,
        created_before: DateTime<Utc>,
        exclude_statuses: &BTreeSet<JobStatus>,
        batch_size: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.inner
            .find_jobs_created_before(created_before, exclude_statuses, batch_size)
            .await
    }

    async fn delete_jobs(&self, ids: &[String]) -> Result<u64, StoreError> {
        self.inner.delete_jobs(ids).await
    }

    async fn find_job_ids_by_status(
        &self,
        statuses: &BTreeSet<JobStatus>,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.find_job_ids_by_status(statuses).await
    }
}

async fn reap_with(race: Race) -> (Arc<JobStateMachine>, job_scheduler::ReapReport) {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(RacingStore {
        inner: InMemoryJobStore::with_clock(clock.clone()),
        race,
    });
    let machine = Arc::new(JobStateMachine::new(
        store,
        Arc::new(NoopEventPublisher),
        clock.clone(),
    ));
    to_running(&machine, "j1").await;
    clock.advance(chrono::Duration::hours(1));

    let reaper = ZombieReaper::new(machine.clone(), clock, ReaperSettings::default());
    let report = reaper.reap_once().await;
    (machine, report)
}

#[tokio::test]
async fn agent_success_beats_reaper() {
    let (machine, report) = reap_with(Race::FinishAfterScan).await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.reaped, 0);
    assert_eq!(report.lost_races, 1);
    assert_eq!(
        machine.get_status("j1").await.unwrap(),
        JobStatus::Succeeded
    );
}

#[tokio::test]
async fn heartbeat_after_reread_saves_the_job() {
    let (machine, report) = reap_with(Race::HeartbeatAfterRead).await;
    assert_eq!(report.examined, 1);
    assert_eq!(report.reaped, 0);
    assert_eq!(report.lost_races, 1);
    assert_eq!(
        machine.get_status("j1").await.unwrap(),
        JobStatus::Running
    );
}
