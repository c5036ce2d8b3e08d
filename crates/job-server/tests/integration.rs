//! End-to-end tests: orchestrator wired from config, catalog loaded from a snapshot file.

use job_catalog::CatalogSnapshot;
use job_launcher::RecordingLauncher;
use job_scheduler::KillOutcome;
use job_server::{launcher_from_config, Orchestrator, ServerConfig, ServerError};
use job_types::{
    AgentClientMetadata, Cluster, ClusterStatus, Command, CommandStatus, Criterion,
    ExecutionResourceCriteria, JobEvent, JobMetadata, JobRequest, JobStatus, JobSubmission,
    ManualClock, ResourceMetadata,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn write_snapshot() -> PathBuf {
    let snapshot = CatalogSnapshot {
        clusters: vec![
            Cluster::new(
                "A",
                ResourceMetadata::new("cluster-a", "1").with_tags(["prod", "sched:adhoc"]),
                ClusterStatus::Up,
            ),
            Cluster::new(
                "B",
                ResourceMetadata::new("cluster-b", "1").with_tags(["test"]),
                ClusterStatus::Up,
            ),
        ],
        commands: vec![Command::new(
            "spark",
            ResourceMetadata::new("spark-submit", "3.5").with_tags(["type:spark"]),
            CommandStatus::Active,
            vec!["spark-submit".into()],
        )],
        cluster_commands: [
            ("A".to_string(), vec!["spark".to_string()]),
            ("B".to_string(), vec!["spark".to_string()]),
        ]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let path = std::env::temp_dir().join(format!("catalog-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();
    path
}

struct Harness {
    orchestrator: Orchestrator,
    launcher: Arc<RecordingLauncher>,
    clock: Arc<ManualClock>,
    snapshot: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.snapshot);
    }
}

async fn harness() -> Harness {
    let snapshot = write_snapshot();
    let config = ServerConfig {
        catalog_path: Some(snapshot.clone()),
        job_directory: PathBuf::from("/tmp/jobs-test"),
        ..Default::default()
    };
    let launcher = Arc::new(RecordingLauncher::new());
    let clock = Arc::new(ManualClock::default());
    let orchestrator = Orchestrator::build(&config, launcher.clone(), clock.clone())
        .await
        .unwrap();
    Harness {
        orchestrator,
        launcher,
        clock,
        snapshot,
    }
}

fn submission(id: &str, cluster_tags: &[&[&str]]) -> JobSubmission {
    JobSubmission {
        requested_id: Some(id.to_string()),
        request: JobRequest::new(
            JobMetadata::new("nightly-report", "alice"),
            ExecutionResourceCriteria {
                cluster_criteria: cluster_tags
                    .iter()
                    .map(|tags| Criterion::with_tags(tags.iter().copied()).unwrap())
                    .collect(),
                command_criterion: Criterion::with_tags(["type:spark"]).unwrap(),
                application_ids: vec![],
            },
        ),
    }
}

#[tokio::test]
async fn job_runs_to_success_through_the_wired_services() {
    let h = harness().await;
    let machine = h.orchestrator.machine();
    let mut events = h.orchestrator.events().subscribe();

    let launched = h
        .orchestrator
        .launcher()
        .launch(&submission("j1", &[&["prod"]]))
        .await
        .unwrap();
    assert_eq!(launched.specification.cluster_id, "A");
    assert_eq!(launched.specification.command_id, "spark");
    assert_eq!(
        launched.specification.job_directory,
        PathBuf::from("/tmp/jobs-test/j1")
    );
    assert_eq!(h.launcher.launches().len(), 1);

    machine
        .claim("j1", &AgentClientMetadata::default())
        .await
        .unwrap();
    for (from, to) in [
        (JobStatus::Claimed, JobStatus::Init),
        (JobStatus::Init, JobStatus::Running),
        (JobStatus::Running, JobStatus::Succeeded),
    ] {
        assert_eq!(machine.update_status("j1", from, to, None).await.unwrap(), to);
    }

    let job = machine.get("j1").await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.started.is_some());
    assert!(job.finished.is_some());

    let mut finished = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let JobEvent::Finished { job_id, status, .. } = event {
            finished.push((job_id, status));
        }
    }
    assert_eq!(finished, vec![("j1".to_string(), JobStatus::Succeeded)]);
}

#[tokio::test]
async fn falls_back_to_lower_priority_criterion() {
    let h = harness().await;
    let launched = h
        .orchestrator
        .launcher()
        .launch(&submission("j1", &[&["gpu"], &["test"]]))
        .await
        .unwrap();
    assert_eq!(launched.specification.cluster_id, "B");
}

#[tokio::test]
async fn kill_signals_the_launched_agent() {
    let h = harness().await;
    h.orchestrator
        .launcher()
        .launch(&submission("j1", &[&["prod"]]))
        .await
        .unwrap();

    let outcome = h.orchestrator.killer().kill("j1", None).await.unwrap();
    assert_eq!(outcome, KillOutcome::Killed);
    assert_eq!(
        h.orchestrator.machine().get_status("j1").await.unwrap(),
        JobStatus::Killed
    );
    assert!(h.launcher.handle("j1").unwrap().was_killed());
}

#[tokio::test]
async fn stale_jobs_are_reaped_and_old_ones_swept() {
    let h = harness().await;
    let machine = h.orchestrator.machine();
    h.orchestrator
        .launcher()
        .launch(&submission("j1", &[&["prod"]]))
        .await
        .unwrap();
    machine
        .claim("j1", &AgentClientMetadata::default())
        .await
        .unwrap();

    h.clock.advance(chrono::Duration::minutes(31));
    let report = h.orchestrator.reaper().reap_once().await;
    assert_eq!(report.reaped, 1);
    let job = machine.get("j1").await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.exit_code, Some(job_types::ZOMBIE_EXIT_CODE));

    h.clock.advance(chrono::Duration::days(11));
    let swept = h.orchestrator.retention().sweep_once().await.unwrap();
    assert_eq!(swept.deleted, 1);
    assert!(machine.get("j1").await.is_err());
}

#[tokio::test]
async fn background_tasks_stop_on_cancel() {
    let h = harness().await;
    let token = tokio_util::sync::CancellationToken::new();
    let tasks = h.orchestrator.spawn_background(token.clone());
    assert_eq!(tasks.len(), 4);
    token.cancel();
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn missing_launcher_configuration_is_an_error() {
    let err = launcher_from_config(&ServerConfig::default()).err().unwrap();
    assert!(matches!(err, ServerError::Setup(_)));

    let config = ServerConfig {
        agent_launch_url: Some("http://localhost:9/launch".into()),
        ..Default::default()
    };
    assert_eq!(launcher_from_config(&config).unwrap().name(), "http");
}

#[tokio::test]
async fn launcher_is_built_from_jobs_environment() {
    let vars = [
        ("JOBS_AGENT_EXECUTABLE", "/usr/local/bin/job-agent"),
        ("JOBS_AGENT_ARGS", "exec --api-job"),
        ("JOBS_AGENT_LAUNCH_URL", "http://localhost:9/launch"),
    ];
    let config = ServerConfig::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .unwrap();
    assert_eq!(config.agent_args, vec!["exec", "--api-job"]);
    // A local executable takes precedence over the launch URL.
    assert_eq!(launcher_from_config(&config).unwrap().name(), "local");

    let remote = ServerConfig {
        agent_executable: None,
        ..config
    };
    assert_eq!(launcher_from_config(&remote).unwrap().name(), "http");
}
