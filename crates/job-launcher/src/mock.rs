//! Recording launcher for tests: no processes, no network.

use async_trait::async_trait;
use job_types::{AgentHandle, AgentLauncher, JobSpecification, LaunchError, LaunchReceipt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Remembers every launch; can be told to fail.
#[derive(Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<(String, JobSpecification)>>,
    handles: Mutex<Vec<(String, Arc<RecordingHandle>)>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent launch fails with `LaunchError::Rejected(reason)`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    pub fn launches(&self) -> Vec<(String, JobSpecification)> {
        self.launches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn handle(&self, job_id: &str) -> Option<Arc<RecordingHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(id, _)| id == job_id)
            .map(|(_, h)| h.clone())
    }
}

#[async_trait]
impl AgentLauncher for RecordingLauncher {
    async fn launch(
        &self,
        job_id: &str,
        specification: &JobSpecification,
    ) -> Result<LaunchReceipt, LaunchError> {
        if let Some(reason) = self
            .fail_with
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(LaunchError::Rejected(reason));
        }
        self.launches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((job_id.to_string(), specification.clone()));
        let handle = Arc::new(RecordingHandle::default());
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((job_id.to_string(), handle.clone()));
        Ok(LaunchReceipt {
            handle: Some(handle),
            launcher_ext: None,
        })
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[derive(Default)]
pub struct RecordingHandle {
    killed: AtomicBool,
}

impl RecordingHandle {
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentHandle for RecordingHandle {
    async fn kill(&self) -> Result<(), LaunchError> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        !self.was_killed()
    }
}
