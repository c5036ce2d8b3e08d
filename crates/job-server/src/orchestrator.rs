//! Builds the catalog, store, resolver, launcher, and services from a [`ServerConfig`].

use crate::{ServerConfig, ServerError};
use job_catalog::{CatalogSnapshot, InMemoryResourceCatalog};
use job_launcher::{HttpAgentLauncher, LocalAgentLauncher};
use job_resolver::{JobResolver, LoadBalancerChain, ScriptLoadBalancer, SpecificationBuilder};
use job_scheduler::{
    AgentRegistry, BroadcastEventPublisher, JobKillService, JobLaunchService, JobStateMachine,
    PeriodicTask, RetentionSweeper, ZombieReaper,
};
use job_store::InMemoryJobStore;
use job_types::{AgentLauncher, Clock, ClusterLoadBalancer, JobEvent, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pick the agent launcher: a local executable wins over a launch URL.
pub fn launcher_from_config(config: &ServerConfig) -> Result<Arc<dyn AgentLauncher>, ServerError> {
    if let Some(executable) = &config.agent_executable {
        return Ok(Arc::new(
            LocalAgentLauncher::new(executable).with_args(config.agent_args.clone()),
        ));
    }
    if let Some(url) = &config.agent_launch_url {
        return Ok(Arc::new(HttpAgentLauncher::new(
            url.clone(),
            config.agent_launch_token.clone(),
        )));
    }
    Err(ServerError::Setup(
        "no agent launcher configured: set JOBS_AGENT_EXECUTABLE or JOBS_AGENT_LAUNCH_URL"
            .to_string(),
    ))
}

pub struct Orchestrator {
    catalog: Arc<InMemoryResourceCatalog>,
    machine: Arc<JobStateMachine>,
    events: Arc<BroadcastEventPublisher>,
    registry: Arc<AgentRegistry>,
    launch: JobLaunchService,
    kill: JobKillService,
    reaper: Arc<ZombieReaper>,
    retention: Arc<RetentionSweeper>,
    prune_interval: Duration,
}

impl Orchestrator {
    pub async fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let launcher = launcher_from_config(config)?;
        Self::build(config, launcher, Arc::new(job_types::SystemClock)).await
    }

    pub async fn build(
        config: &ServerConfig,
        launcher: Arc<dyn AgentLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServerError> {
        let catalog = Arc::new(load_catalog(config).await?);
        let store = open_store(config, clock.clone())?;
        let events = Arc::new(BroadcastEventPublisher::new(config.event_capacity));

        let machine = Arc::new(
            JobStateMachine::new(store.clone(), events.clone(), clock.clone())
                .with_max_message_len(config.status_message_max_len),
        );

        let mut balancers: Vec<Arc<dyn ClusterLoadBalancer>> = Vec::new();
        if let Some(script) = &config.load_balancer_script {
            balancers.push(Arc::new(
                ScriptLoadBalancer::new(script)
                    .with_timeout(Duration::from_secs(config.load_balancer_timeout_secs)),
            ));
        }
        let chain = LoadBalancerChain::new(balancers);
        tracing::info!(balancers = ?chain.names(), "load balancer chain ready");

        let resolver = Arc::new(JobResolver::new(
            catalog.clone(),
            chain,
            SpecificationBuilder::new(config.resolver_settings()),
        ));
        let registry = Arc::new(AgentRegistry::new());

        Ok(Self {
            launch: JobLaunchService::new(
                machine.clone(),
                resolver,
                launcher,
                registry.clone(),
            ),
            kill: JobKillService::new(machine.clone(), registry.clone()),
            reaper: Arc::new(ZombieReaper::new(
                machine.clone(),
                clock.clone(),
                config.reaper_settings(),
            )),
            retention: Arc::new(RetentionSweeper::new(
                store,
                clock,
                config.retention_settings(),
            )),
            prune_interval: Duration::from_secs(config.zombie_interval_secs),
            catalog,
            machine,
            events,
            registry,
        })
    }

    pub fn catalog(&self) -> &Arc<InMemoryResourceCatalog> {
        &self.catalog
    }

    pub fn machine(&self) -> &Arc<JobStateMachine> {
        &self.machine
    }

    pub fn events(&self) -> &Arc<BroadcastEventPublisher> {
        &self.events
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn launcher(&self) -> &JobLaunchService {
        &self.launch
    }

    pub fn killer(&self) -> &JobKillService {
        &self.kill
    }

    pub fn reaper(&self) -> &Arc<ZombieReaper> {
        &self.reaper
    }

    pub fn retention(&self) -> &Arc<RetentionSweeper> {
        &self.retention
    }

    /// Start the reaper, retention sweep, handle pruning, and event logging. All of them stop
    /// when `token` is cancelled.
    pub fn spawn_background(&self, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let registry = self.registry.clone();
        let prune = PeriodicTask::new("agent-registry-prune", self.prune_interval).spawn(
            token.clone(),
            move || {
                let registry = registry.clone();
                async move {
                    let removed = registry.prune().await;
                    if removed > 0 {
                        tracing::debug!(removed, "pruned exited agent handles");
                    }
                }
            },
        );
        vec![
            self.reaper.clone().spawn(token.clone()),
            self.retention.clone().spawn(token.clone()),
            prune,
            self.spawn_event_log(token),
        ]
    }

    fn spawn_event_log(&self, token: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => return,
                    event = rx.recv() => event,
                };
                match event {
                    Ok(JobEvent::Finished {
                        job_id,
                        status,
                        message,
                        ..
                    }) => {
                        tracing::info!(job_id = %job_id, status = %status, message = ?message, "job finished");
                    }
                    Ok(JobEvent::StatusChanged { job_id, from, to, .. }) => {
                        tracing::debug!(job_id = %job_id, from = %from, to = %to, "job status changed");
                    }
                    Ok(JobEvent::Resolved { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event log fell behind");
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }
}

async fn load_catalog(config: &ServerConfig) -> Result<InMemoryResourceCatalog, ServerError> {
    let Some(path) = &config.catalog_path else {
        tracing::info!("no catalog snapshot configured, starting with an empty catalog");
        return Ok(InMemoryResourceCatalog::new());
    };
    let raw = tokio::fs::read_to_string(path).await?;
    let snapshot: CatalogSnapshot = serde_json::from_str(&raw)?;
    tracing::info!(
        path = %path.display(),
        clusters = snapshot.clusters.len(),
        commands = snapshot.commands.len(),
        applications = snapshot.applications.len(),
        "loading catalog snapshot"
    );
    Ok(InMemoryResourceCatalog::from_snapshot(snapshot).await?)
}

#[cfg(feature = "sqlite")]
fn open_store(config: &ServerConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn JobStore>, ServerError> {
    match &config.db_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using sqlite job store");
            Ok(Arc::new(job_store::SqliteJobStore::new(path)?))
        }
        None => Ok(Arc::new(InMemoryJobStore::with_clock(clock))),
    }
}

#[cfg(not(feature = "sqlite"))]
fn open_store(config: &ServerConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn JobStore>, ServerError> {
    if config.db_path.is_some() {
        return Err(ServerError::Setup(
            "JOBS_DB_PATH is set but the server was built without the sqlite feature".to_string(),
        ));
    }
    Ok(Arc::new(InMemoryJobStore::with_clock(clock)))
}
