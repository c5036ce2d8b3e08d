//! Launches the agent as a local child process.

use async_trait::async_trait;
use job_types::{AgentHandle, AgentLauncher, JobSpecification, LaunchError, LaunchReceipt};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::Mutex;

/// Env var carrying the serialized specification into the agent process.
pub const SPECIFICATION_ENV_VAR: &str = "JOB_SPECIFICATION";

pub struct LocalAgentLauncher {
    executable: PathBuf,
    args: Vec<String>,
    create_job_directory: bool,
}

impl LocalAgentLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            create_job_directory: true,
        }
    }

    /// Arguments placed before `--job-id <id>`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn create_job_directory(mut self, create: bool) -> Self {
        self.create_job_directory = create;
        self
    }
}

#[async_trait]
impl AgentLauncher for LocalAgentLauncher {
    async fn launch(
        &self,
        job_id: &str,
        specification: &JobSpecification,
    ) -> Result<LaunchReceipt, LaunchError> {
        if self.create_job_directory {
            tokio::fs::create_dir_all(&specification.job_directory)
                .await
                .map_err(|e| {
                    LaunchError::Rejected(format!(
                        "cannot create job directory {}: {}",
                        specification.job_directory.display(),
                        e
                    ))
                })?;
        }
        let spec_json =
            serde_json::to_string(specification).map_err(|e| LaunchError::Other(e.to_string()))?;

        let mut command = tokio::process::Command::new(&self.executable);
        command
            .args(&self.args)
            .arg("--job-id")
            .arg(job_id)
            .envs(&specification.environment_variables)
            .env(SPECIFICATION_ENV_VAR, spec_json)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if self.create_job_directory {
            command.current_dir(&specification.job_directory);
        }
        let child = command.spawn().map_err(|e| {
            LaunchError::Unavailable(format!("spawn {}: {}", self.executable.display(), e))
        })?;

        let pid = child.id();
        tracing::info!(job_id = %job_id, pid = ?pid, executable = %self.executable.display(), "agent launched");
        Ok(LaunchReceipt {
            handle: Some(Arc::new(LocalAgentHandle {
                pid,
                child: Mutex::new(child),
            })),
            launcher_ext: Some(serde_json::json!({
                "launcher": "local",
                "pid": pid,
            })),
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Handle on a locally spawned agent.
pub struct LocalAgentHandle {
    pid: Option<u32>,
    child: Mutex<Child>,
}

#[async_trait]
impl AgentHandle for LocalAgentHandle {
    async fn kill(&self) -> Result<(), LaunchError> {
        let mut child = self.child.lock().await;
        if child
            .try_wait()
            .map_err(|e| LaunchError::Other(e.to_string()))?
            .is_some()
        {
            return Ok(());
        }
        child
            .kill()
            .await
            .map_err(|e| LaunchError::Other(format!("kill agent: {}", e)))
    }

    async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use job_types::ComputeResources;
    use std::time::Duration;

    fn spec(dir: PathBuf) -> JobSpecification {
        JobSpecification {
            cluster_id: "A".into(),
            command_id: "spark".into(),
            application_ids: vec![],
            command_args: vec!["spark-submit".into()],
            environment_variables: [("JOB_ID".to_string(), "job-1".to_string())]
                .into_iter()
                .collect(),
            job_directory: dir,
            archive_location: None,
            timeout_secs: None,
            compute: ComputeResources {
                cpu: None,
                memory_mb: 1536,
            },
        }
    }

    #[tokio::test]
    async fn launches_and_kills_child() {
        let dir = std::env::temp_dir().join(format!("job-launcher-test-{}", std::process::id()));
        let launcher = LocalAgentLauncher::new("/bin/sh")
            .with_args(vec!["-c".into(), "sleep 30".into(), "agent".into()]);
        let receipt = launcher.launch("job-1", &spec(dir.clone())).await.unwrap();
        let handle = receipt.handle.unwrap();
        assert!(handle.pid().is_some());
        assert!(handle.is_alive().await);
        handle.kill().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_alive().await);
        // Killing an exited agent is a no-op.
        handle.kill().await.unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let launcher = LocalAgentLauncher::new("/definitely/not/here").create_job_directory(false);
        let err = launcher
            .launch("job-1", &spec(PathBuf::from("/tmp")))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Unavailable(_)));
    }
}
