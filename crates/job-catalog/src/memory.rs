//! In-memory resource catalog.

use crate::matcher;
use chrono::Utc;
use job_types::{
    Application, CatalogError, Cluster, ClusterStatus, Command, CommandStatus, Criterion,
    ResourceCatalog,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Serializable catalog contents, used to seed a catalog from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub applications: Vec<Application>,
    /// cluster id -> command ids in priority order.
    #[serde(default)]
    pub cluster_commands: HashMap<String, Vec<String>>,
    /// command id -> application ids in load order.
    #[serde(default)]
    pub command_applications: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct CatalogState {
    // BTreeMap keeps listing order stable (by id).
    clusters: BTreeMap<String, Cluster>,
    commands: BTreeMap<String, Command>,
    applications: BTreeMap<String, Application>,
    cluster_commands: HashMap<String, Vec<String>>,
    command_applications: HashMap<String, Vec<String>>,
}

/// Process-local catalog. Reads never block each other; registration takes a write lock.
pub struct InMemoryResourceCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryResourceCatalog {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(CatalogState::default())),
        }
    }

    /// Build a catalog from a snapshot, validating every association.
    pub async fn from_snapshot(snapshot: CatalogSnapshot) -> Result<Self, CatalogError> {
        let catalog = Self::new();
        catalog.load_snapshot(snapshot).await?;
        Ok(catalog)
    }

    /// Register every resource and association in `snapshot`.
    pub async fn load_snapshot(&self, snapshot: CatalogSnapshot) -> Result<(), CatalogError> {
        for cluster in snapshot.clusters {
            self.save_cluster(cluster).await?;
        }
        for command in snapshot.commands {
            self.save_command(command).await?;
        }
        for application in snapshot.applications {
            self.save_application(application).await?;
        }
        for (cluster_id, command_ids) in snapshot.cluster_commands {
            self.set_commands_for_cluster(&cluster_id, command_ids).await?;
        }
        for (command_id, application_ids) in snapshot.command_applications {
            self.set_applications_for_command(&command_id, application_ids)
                .await?;
        }
        Ok(())
    }

    pub async fn save_cluster(&self, cluster: Cluster) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        if guard.clusters.contains_key(&cluster.id) {
            return Err(CatalogError::IdAlreadyExists(cluster.id));
        }
        tracing::debug!(cluster_id = %cluster.id, "registered cluster");
        guard.clusters.insert(cluster.id.clone(), cluster);
        Ok(())
    }

    pub async fn save_command(&self, command: Command) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        if guard.commands.contains_key(&command.id) {
            return Err(CatalogError::IdAlreadyExists(command.id));
        }
        tracing::debug!(command_id = %command.id, "registered command");
        guard.commands.insert(command.id.clone(), command);
        Ok(())
    }

    pub async fn save_application(&self, application: Application) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        if guard.applications.contains_key(&application.id) {
            return Err(CatalogError::IdAlreadyExists(application.id));
        }
        guard
            .applications
            .insert(application.id.clone(), application);
        Ok(())
    }

    pub async fn set_cluster_status(
        &self,
        id: &str,
        status: ClusterStatus,
    ) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        let cluster = guard
            .clusters
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(format!("cluster {}", id)))?;
        cluster.status = status;
        cluster.updated = Utc::now();
        Ok(())
    }

    pub async fn set_command_status(
        &self,
        id: &str,
        status: CommandStatus,
    ) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        let command = guard
            .commands
            .get_mut(id)
            .ok_or_else(|| CatalogError::NotFound(format!("command {}", id)))?;
        command.status = status;
        command.updated = Utc::now();
        Ok(())
    }

    /// Replace the commands available on a cluster. Order is priority order.
    pub async fn set_commands_for_cluster(
        &self,
        cluster_id: &str,
        command_ids: Vec<String>,
    ) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        if !guard.clusters.contains_key(cluster_id) {
            return Err(CatalogError::NotFound(format!("cluster {}", cluster_id)));
        }
        if let Some(missing) = command_ids.iter().find(|id| !guard.commands.contains_key(*id)) {
            return Err(CatalogError::PreconditionFailed(format!(
                "command {} does not exist",
                missing
            )));
        }
        let mut deduped: Vec<String> = Vec::with_capacity(command_ids.len());
        for id in command_ids {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        guard.cluster_commands.insert(cluster_id.to_string(), deduped);
        Ok(())
    }

    pub async fn set_applications_for_command(
        &self,
        command_id: &str,
        application_ids: Vec<String>,
    ) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        if !guard.commands.contains_key(command_id) {
            return Err(CatalogError::NotFound(format!("command {}", command_id)));
        }
        if let Some(missing) = application_ids
            .iter()
            .find(|id| !guard.applications.contains_key(*id))
        {
            return Err(CatalogError::PreconditionFailed(format!(
                "application {} does not exist",
                missing
            )));
        }
        guard
            .command_applications
            .insert(command_id.to_string(), application_ids);
        Ok(())
    }

    /// Remove a cluster and its command associations.
    pub async fn delete_cluster(&self, id: &str) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        if guard.clusters.remove(id).is_none() {
            return Err(CatalogError::NotFound(format!("cluster {}", id)));
        }
        guard.cluster_commands.remove(id);
        tracing::debug!(cluster_id = %id, "deleted cluster");
        Ok(())
    }

    /// Remove a command, detaching it from every cluster.
    pub async fn delete_command(&self, id: &str) -> Result<(), CatalogError> {
        let mut guard = self.state.write().await;
        if guard.commands.remove(id).is_none() {
            return Err(CatalogError::NotFound(format!("command {}", id)));
        }
        guard.command_applications.remove(id);
        for ids in guard.cluster_commands.values_mut() {
            ids.retain(|c| c != id);
        }
        Ok(())
    }
}

impl Default for InMemoryResourceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ResourceCatalog for InMemoryResourceCatalog {
    async fn find_matching_clusters(
        &self,
        criterion: &Criterion,
        add_default_status: bool,
    ) -> Result<Vec<Cluster>, CatalogError> {
        let guard = self.state.read().await;
        let pool: Vec<Cluster> = guard.clusters.values().cloned().collect();
        drop(guard);
        let default_status = add_default_status.then(|| ClusterStatus::DEFAULT_FILTER.as_str());
        Ok(matcher::filter(criterion, &pool, default_status))
    }

    async fn find_matching_clusters_any(
        &self,
        criteria: &[Criterion],
        add_default_status: bool,
    ) -> Result<Vec<Cluster>, CatalogError> {
        let guard = self.state.read().await;
        let pool: Vec<Cluster> = guard.clusters.values().cloned().collect();
        drop(guard);
        let default_status = add_default_status.then(|| ClusterStatus::DEFAULT_FILTER.as_str());
        let mut seen: BTreeMap<String, Cluster> = BTreeMap::new();
        for criterion in criteria {
            for cluster in matcher::filter(criterion, &pool, default_status) {
                seen.entry(cluster.id.clone()).or_insert(cluster);
            }
        }
        Ok(seen.into_values().collect())
    }

    async fn find_matching_commands(
        &self,
        criterion: &Criterion,
        add_default_status: bool,
    ) -> Result<Vec<Command>, CatalogError> {
        let guard = self.state.read().await;
        let pool: Vec<Command> = guard.commands.values().cloned().collect();
        drop(guard);
        let default_status = add_default_status.then(|| CommandStatus::DEFAULT_FILTER.as_str());
        Ok(matcher::filter(criterion, &pool, default_status))
    }

    async fn get_cluster_commands(&self, cluster_id: &str) -> Result<Vec<Command>, CatalogError> {
        let guard = self.state.read().await;
        if !guard.clusters.contains_key(cluster_id) {
            return Err(CatalogError::NotFound(format!("cluster {}", cluster_id)));
        }
        let commands = guard
            .cluster_commands
            .get(cluster_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| guard.commands.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(commands)
    }

    async fn get_cluster(&self, id: &str) -> Result<Cluster, CatalogError> {
        let guard = self.state.read().await;
        guard
            .clusters
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("cluster {}", id)))
    }

    async fn get_command(&self, id: &str) -> Result<Command, CatalogError> {
        let guard = self.state.read().await;
        guard
            .commands
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("command {}", id)))
    }

    async fn get_application(&self, id: &str) -> Result<Application, CatalogError> {
        let guard = self.state.read().await;
        guard
            .applications
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("application {}", id)))
    }

    async fn get_applications_for_command(
        &self,
        command_id: &str,
    ) -> Result<Vec<Application>, CatalogError> {
        let guard = self.state.read().await;
        if !guard.commands.contains_key(command_id) {
            return Err(CatalogError::NotFound(format!("command {}", command_id)));
        }
        let apps = guard
            .command_applications
            .get(command_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| guard.applications.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(apps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_types::{ApplicationStatus, ResourceMetadata};

    async fn seeded() -> InMemoryResourceCatalog {
        let catalog = InMemoryResourceCatalog::new();
        catalog
            .save_cluster(Cluster::new(
                "a",
                ResourceMetadata::new("cluster-a", "1").with_tags(["prod", "gpu"]),
                ClusterStatus::Up,
            ))
            .await
            .unwrap();
        catalog
            .save_cluster(Cluster::new(
                "b",
                ResourceMetadata::new("cluster-b", "1").with_tags(["dev"]),
                ClusterStatus::Up,
            ))
            .await
            .unwrap();
        catalog
            .save_cluster(Cluster::new(
                "c",
                ResourceMetadata::new("cluster-c", "1").with_tags(["prod"]),
                ClusterStatus::Terminated,
            ))
            .await
            .unwrap();
        catalog
            .save_command(Command::new(
                "spark",
                ResourceMetadata::new("spark-submit", "3"),
                CommandStatus::Active,
                vec!["spark-submit".to_string()],
            ))
            .await
            .unwrap();
        catalog
            .save_command(Command::new(
                "hive",
                ResourceMetadata::new("hive", "2"),
                CommandStatus::Deprecated,
                vec!["hive".to_string()],
            ))
            .await
            .unwrap();
        catalog
            .set_commands_for_cluster("a", vec!["hive".into(), "spark".into(), "spark".into()])
            .await
            .unwrap();
        catalog
    }

    #[tokio::test]
    async fn matching_clusters_apply_default_status() {
        let catalog = seeded().await;
        let prod = Criterion::with_tags(["prod"]).unwrap();
        let up: Vec<String> = catalog
            .find_matching_clusters(&prod, true)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(up, vec!["a"]);
        let all = catalog.find_matching_clusters(&prod, false).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn any_criteria_union_is_deduplicated() {
        let catalog = seeded().await;
        let criteria = vec![
            Criterion::with_tags(["prod"]).unwrap(),
            Criterion::with_tags(["gpu"]).unwrap(),
            Criterion::with_tags(["dev"]).unwrap(),
        ];
        let ids: Vec<String> = catalog
            .find_matching_clusters_any(&criteria, true)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cluster_commands_keep_priority_order() {
        let catalog = seeded().await;
        let ids: Vec<String> = catalog
            .get_cluster_commands("a")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["hive", "spark"]);
        assert!(catalog.get_cluster_commands("b").await.unwrap().is_empty());
        assert!(matches!(
            catalog.get_cluster_commands("zzz").await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_ids_and_unknown_associations_are_rejected() {
        let catalog = seeded().await;
        let dup = Cluster::new("a", ResourceMetadata::new("x", "1"), ClusterStatus::Up);
        assert!(matches!(
            catalog.save_cluster(dup).await,
            Err(CatalogError::IdAlreadyExists(_))
        ));
        assert!(matches!(
            catalog.set_commands_for_cluster("a", vec!["nope".into()]).await,
            Err(CatalogError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn deleting_command_detaches_it() {
        let catalog = seeded().await;
        catalog.delete_command("hive").await.unwrap();
        let ids: Vec<String> = catalog
            .get_cluster_commands("a")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["spark"]);
    }

    #[tokio::test]
    async fn snapshot_loads_from_json() {
        let json = serde_json::json!({
            "clusters": [
                { "id": "c1", "metadata": { "name": "c1", "version": "1", "tags": ["prod"] }, "status": "UP" }
            ],
            "commands": [
                { "id": "cmd1", "metadata": { "name": "spark-submit", "version": "3" }, "status": "ACTIVE",
                  "executable": ["spark-submit"], "profile": "spark" }
            ],
            "applications": [
                { "id": "app1", "metadata": { "name": "spark", "version": "3" }, "status": "ACTIVE" }
            ],
            "cluster_commands": { "c1": ["cmd1"] },
            "command_applications": { "cmd1": ["app1"] }
        });
        let snapshot: CatalogSnapshot = serde_json::from_value(json).unwrap();
        let catalog = InMemoryResourceCatalog::from_snapshot(snapshot).await.unwrap();
        let apps = catalog.get_applications_for_command("cmd1").await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].status, ApplicationStatus::Active);
        assert_eq!(catalog.get_cluster_commands("c1").await.unwrap()[0].id, "cmd1");
    }
}
