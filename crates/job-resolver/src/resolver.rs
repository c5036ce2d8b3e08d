//! Cluster/command resolution over a resource catalog.
//!
//! Stateless: every call works only from the catalog and its arguments.

use job_types::{Cluster, Command, Criterion, ResolutionError, ResourceCatalog};
use std::collections::{BTreeMap, HashSet};

/// A cluster together with the command chosen to run on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCommand {
    pub cluster: Cluster,
    pub command: Command,
}

/// Resolve ordered cluster criteria and a command criterion to runnable cluster/command pairs.
///
/// Criteria are tried in order and the first one yielding at least one cluster that carries
/// a matching command wins; later criteria are never consulted. Per cluster, the first
/// matching command in the cluster's priority order is used.
pub async fn resolve(
    catalog: &dyn ResourceCatalog,
    cluster_criteria: &[Criterion],
    command_criterion: &Criterion,
) -> Result<Vec<ClusterCommand>, ResolutionError> {
    if cluster_criteria.is_empty() {
        return Err(ResolutionError::PreconditionFailed(
            "at least one cluster criterion is required".to_string(),
        ));
    }

    let matching_commands: HashSet<String> = catalog
        .find_matching_commands(command_criterion, true)
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();
    if matching_commands.is_empty() {
        return Err(ResolutionError::NoMatchFound(format!(
            "no command matches {}",
            command_criterion
        )));
    }

    for (priority, criterion) in cluster_criteria.iter().enumerate() {
        let clusters = catalog.find_matching_clusters(criterion, true).await?;
        let mut resolved = Vec::new();
        for cluster in clusters {
            let commands = catalog.get_cluster_commands(&cluster.id).await?;
            if let Some(command) = commands
                .into_iter()
                .find(|c| matching_commands.contains(&c.id))
            {
                resolved.push(ClusterCommand { cluster, command });
            }
        }
        if !resolved.is_empty() {
            tracing::debug!(
                priority,
                criterion = %criterion,
                clusters = resolved.len(),
                "cluster criterion matched"
            );
            return Ok(resolved);
        }
        tracing::debug!(priority, criterion = %criterion, "cluster criterion had no usable match");
    }

    Err(ResolutionError::NoMatchFound(format!(
        "no cluster matching any of {} criteria has a command matching {}",
        cluster_criteria.len(),
        command_criterion
    )))
}

/// Clusters matching at least one criterion, de-duplicated by id and ordered by id.
pub async fn resolve_any(
    catalog: &dyn ResourceCatalog,
    criteria: &[Criterion],
) -> Result<Vec<Cluster>, ResolutionError> {
    let mut seen: BTreeMap<String, Cluster> = BTreeMap::new();
    for criterion in criteria {
        for cluster in catalog.find_matching_clusters(criterion, true).await? {
            seen.entry(cluster.id.clone()).or_insert(cluster);
        }
    }
    Ok(seen.into_values().collect())
}
