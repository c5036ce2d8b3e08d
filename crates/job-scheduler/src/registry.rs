//! Live agent handles by job id.

use job_types::AgentHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct AgentRegistry {
    handles: RwLock<HashMap<String, Arc<dyn AgentHandle>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job_id: &str, handle: Arc<dyn AgentHandle>) {
        self.handles
            .write()
            .await
            .insert(job_id.to_string(), handle);
    }

    pub async fn get(&self, job_id: &str) -> Option<Arc<dyn AgentHandle>> {
        self.handles.read().await.get(job_id).cloned()
    }

    pub async fn remove(&self, job_id: &str) -> Option<Arc<dyn AgentHandle>> {
        self.handles.write().await.remove(job_id)
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    /// Drop handles whose agent has exited. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let snapshot: Vec<(String, Arc<dyn AgentHandle>)> = self
            .handles
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut dead = Vec::new();
        for (id, handle) in snapshot {
            if !handle.is_alive().await {
                dead.push(id);
            }
        }
        let mut guard = self.handles.write().await;
        for id in &dead {
            guard.remove(id);
        }
        dead.len()
    }
}
