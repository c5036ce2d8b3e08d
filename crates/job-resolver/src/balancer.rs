//! Cluster load balancers and the precedence chain that combines them.

use async_trait::async_trait;
use job_types::{Cluster, ClusterLoadBalancer, JobRequestContext, LoadBalancerError};
use rand::Rng;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Uniform random choice. Never declines a non-empty candidate set.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomLoadBalancer;

impl RandomLoadBalancer {
    /// Runs after every other balancer.
    pub const ORDER: i32 = i32::MAX;
}

#[async_trait]
impl ClusterLoadBalancer for RandomLoadBalancer {
    async fn select(
        &self,
        candidates: &[Cluster],
        _context: &JobRequestContext,
    ) -> Result<Option<Cluster>, LoadBalancerError> {
        if candidates.is_empty() {
            return Err(LoadBalancerError::PreconditionFailed(
                "no candidate clusters".to_string(),
            ));
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Ok(Some(candidates[idx].clone()))
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScriptInput<'a> {
    clusters: &'a [Cluster],
    job_id: &'a str,
    job_request: &'a job_types::JobRequest,
    cluster_commands: &'a std::collections::BTreeMap<String, String>,
}

/// Delegates the choice to an external executable.
///
/// The program receives `{"clusters": [...], "jobId": "...", "jobRequest": {...},
/// "clusterCommands": {"<cluster id>": "<command id>"}}` on stdin and prints the id of the
/// chosen cluster. Anything else (an unknown id, empty output, a non-zero exit, running past
/// the timeout) means no preference.
#[derive(Debug, Clone)]
pub struct ScriptLoadBalancer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    order: i32,
}

impl ScriptLoadBalancer {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_ORDER: i32 = 100;

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            order: Self::DEFAULT_ORDER,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    async fn run(&self, input: Vec<u8>) -> Result<Option<String>, LoadBalancerError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LoadBalancerError::Other(format!("spawn {}: {}", self.program.display(), e))
            })?;

        let stdin = child.stdin.take();
        // The deadline covers writing stdin as well; dropping `child` on timeout kills it.
        let exchange = async move {
            if let Some(mut stdin) = stdin {
                stdin
                    .write_all(&input)
                    .await
                    .map_err(|e| LoadBalancerError::Other(format!("write stdin: {}", e)))?;
                // Closing stdin signals end of input to the script.
                drop(stdin);
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| LoadBalancerError::Other(e.to_string()))
        };
        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| LoadBalancerError::Timeout(self.timeout))??;

        if !output.status.success() {
            tracing::debug!(status = %output.status, "load balancer script exited unsuccessfully");
            return Ok(None);
        }
        let chosen = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!chosen.is_empty()).then_some(chosen))
    }
}

#[async_trait]
impl ClusterLoadBalancer for ScriptLoadBalancer {
    async fn select(
        &self,
        candidates: &[Cluster],
        context: &JobRequestContext,
    ) -> Result<Option<Cluster>, LoadBalancerError> {
        let input = serde_json::to_vec(&ScriptInput {
            clusters: candidates,
            job_id: &context.job_id,
            job_request: &context.request,
            cluster_commands: &context.cluster_commands,
        })
        .map_err(|e| LoadBalancerError::Other(e.to_string()))?;

        let Some(chosen) = self.run(input).await? else {
            return Ok(None);
        };
        let selected = candidates.iter().find(|c| c.id == chosen).cloned();
        if selected.is_none() {
            tracing::warn!(
                job_id = %context.job_id,
                cluster_id = %chosen,
                "load balancer script returned a cluster that is not a candidate"
            );
        }
        Ok(selected)
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        "script"
    }
}

/// Balancers tried in ascending `order()`, with the random balancer as guaranteed fallback.
pub struct LoadBalancerChain {
    balancers: Vec<Arc<dyn ClusterLoadBalancer>>,
}

impl LoadBalancerChain {
    pub fn new(mut balancers: Vec<Arc<dyn ClusterLoadBalancer>>) -> Self {
        balancers.sort_by_key(|b| b.order());
        balancers.push(Arc::new(RandomLoadBalancer));
        Self { balancers }
    }

    /// Names in the order they are consulted.
    pub fn names(&self) -> Vec<&str> {
        self.balancers.iter().map(|b| b.name()).collect()
    }

    pub async fn select(
        &self,
        candidates: &[Cluster],
        context: &JobRequestContext,
    ) -> Result<Cluster, LoadBalancerError> {
        match candidates {
            [] => {
                return Err(LoadBalancerError::PreconditionFailed(
                    "no candidate clusters to balance".to_string(),
                ))
            }
            [only] => return Ok(only.clone()),
            _ => {}
        }

        for balancer in &self.balancers {
            match balancer.select(candidates, context).await {
                Ok(Some(cluster)) if candidates.iter().any(|c| c.id == cluster.id) => {
                    tracing::debug!(
                        job_id = %context.job_id,
                        balancer = balancer.name(),
                        cluster_id = %cluster.id,
                        "cluster selected"
                    );
                    return Ok(cluster);
                }
                Ok(Some(cluster)) => {
                    tracing::warn!(
                        balancer = balancer.name(),
                        cluster_id = %cluster.id,
                        "balancer picked a non-candidate cluster; ignoring"
                    );
                }
                Ok(None) => {
                    tracing::debug!(balancer = balancer.name(), "balancer declined");
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %context.job_id,
                        balancer = balancer.name(),
                        error = %e,
                        "balancer failed; trying next"
                    );
                }
            }
        }
        Err(LoadBalancerError::Other(
            "every load balancer declined".to_string(),
        ))
    }
}

impl Default for LoadBalancerChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
