//! End-to-end resolution of a job request: match, balance, and build the specification.

use crate::balancer::LoadBalancerChain;
use crate::resolver::{self, ClusterCommand};
use crate::specification::SpecificationBuilder;
use job_types::{
    Application, Cluster, Command, JobRequest, JobRequestContext, JobSpecification,
    ResolutionError, ResourceCatalog,
};
use std::sync::Arc;

/// Everything resolution decided for one job.
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    pub cluster: Cluster,
    pub command: Command,
    pub applications: Vec<Application>,
    pub specification: JobSpecification,
}

pub struct JobResolver {
    catalog: Arc<dyn ResourceCatalog>,
    balancers: LoadBalancerChain,
    builder: SpecificationBuilder,
}

impl JobResolver {
    pub fn new(
        catalog: Arc<dyn ResourceCatalog>,
        balancers: LoadBalancerChain,
        builder: SpecificationBuilder,
    ) -> Self {
        Self {
            catalog,
            balancers,
            builder,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn ResourceCatalog> {
        &self.catalog
    }

    pub async fn resolve(
        &self,
        job_id: &str,
        request: &JobRequest,
    ) -> Result<ResolvedJob, ResolutionError> {
        let criteria = &request.criteria;
        let mut pairs = resolver::resolve(
            self.catalog.as_ref(),
            &criteria.cluster_criteria,
            &criteria.command_criterion,
        )
        .await?;

        let candidates: Vec<Cluster> = pairs.iter().map(|p| p.cluster.clone()).collect();
        let context = JobRequestContext {
            job_id: job_id.to_string(),
            request: request.clone(),
            cluster_commands: pairs
                .iter()
                .map(|p| (p.cluster.id.clone(), p.command.id.clone()))
                .collect(),
        };
        let selected = self.balancers.select(&candidates, &context).await?;
        let idx = pairs
            .iter()
            .position(|p| p.cluster.id == selected.id)
            .ok_or_else(|| {
                ResolutionError::PreconditionFailed(format!(
                    "selected cluster {} was not a candidate",
                    selected.id
                ))
            })?;
        let ClusterCommand { cluster, command } = pairs.swap_remove(idx);

        let applications = self.applications(request, &command).await?;
        let specification = self
            .builder
            .build(job_id, request, &cluster, &command, &applications);

        tracing::info!(
            job_id = %job_id,
            cluster_id = %cluster.id,
            command_id = %command.id,
            applications = applications.len(),
            "job resolved"
        );
        Ok(ResolvedJob {
            cluster,
            command,
            applications,
            specification,
        })
    }

    /// Explicitly requested applications, else the command's own.
    async fn applications(
        &self,
        request: &JobRequest,
        command: &Command,
    ) -> Result<Vec<Application>, ResolutionError> {
        if request.criteria.application_ids.is_empty() {
            return Ok(self.catalog.get_applications_for_command(&command.id).await?);
        }
        let mut apps = Vec::with_capacity(request.criteria.application_ids.len());
        for id in &request.criteria.application_ids {
            apps.push(self.catalog.get_application(id).await?);
        }
        Ok(apps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::ResolverSettings;
    use job_catalog::InMemoryResourceCatalog;
    use job_types::{
        ApplicationStatus, CatalogError, ClusterStatus, CommandStatus, Criterion,
        ExecutionResourceCriteria, JobMetadata, ResourceMetadata,
    };

    async fn catalog() -> Arc<InMemoryResourceCatalog> {
        let catalog = InMemoryResourceCatalog::new();
        catalog
            .save_cluster(Cluster::new(
                "A",
                ResourceMetadata::new("A", "1").with_tags(["prod", "gpu"]),
                ClusterStatus::Up,
            ))
            .await
            .unwrap();
        catalog
            .save_cluster(Cluster::new(
                "B",
                ResourceMetadata::new("B", "1").with_tags(["dev"]),
                ClusterStatus::Up,
            ))
            .await
            .unwrap();
        catalog
            .save_command(Command::new(
                "spark",
                ResourceMetadata::new("spark-submit", "3"),
                CommandStatus::Active,
                vec!["spark-submit".into()],
            ))
            .await
            .unwrap();
        for id in ["spark-app", "hadoop-app"] {
            catalog
                .save_application(Application::new(
                    id,
                    ResourceMetadata::new(id, "1"),
                    ApplicationStatus::Active,
                ))
                .await
                .unwrap();
        }
        catalog
            .set_commands_for_cluster("A", vec!["spark".into()])
            .await
            .unwrap();
        catalog
            .set_applications_for_command("spark", vec!["spark-app".into()])
            .await
            .unwrap();
        Arc::new(catalog)
    }

    fn request(application_ids: Vec<String>) -> JobRequest {
        JobRequest::new(
            JobMetadata::new("etl", "alice"),
            ExecutionResourceCriteria {
                cluster_criteria: vec![Criterion::with_tags(["prod"]).unwrap()],
                command_criterion: Criterion::builder().name("spark-submit").build().unwrap(),
                application_ids,
            },
        )
    }

    fn resolver(catalog: Arc<InMemoryResourceCatalog>) -> JobResolver {
        JobResolver::new(
            catalog,
            LoadBalancerChain::default(),
            SpecificationBuilder::new(ResolverSettings::default()),
        )
    }

    #[tokio::test]
    async fn resolves_example_scenario_end_to_end() {
        let resolved = resolver(catalog().await)
            .resolve("job-1", &request(vec![]))
            .await
            .unwrap();
        assert_eq!(resolved.cluster.id, "A");
        assert_eq!(resolved.command.id, "spark");
        assert_eq!(resolved.specification.application_ids, vec!["spark-app"]);
        assert_eq!(resolved.specification.compute.memory_mb, 1536);
    }

    #[tokio::test]
    async fn explicit_applications_replace_command_defaults() {
        let resolved = resolver(catalog().await)
            .resolve("job-1", &request(vec!["hadoop-app".into()]))
            .await
            .unwrap();
        assert_eq!(resolved.specification.application_ids, vec!["hadoop-app"]);

        let err = resolver(catalog().await)
            .resolve("job-1", &request(vec!["missing".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Catalog(CatalogError::NotFound(_))));
    }

    /// Picks cluster C and remembers what it was shown.
    #[derive(Default)]
    struct Inspecting {
        seen: std::sync::Mutex<Option<JobRequestContext>>,
    }

    #[async_trait::async_trait]
    impl job_types::ClusterLoadBalancer for Inspecting {
        async fn select(
            &self,
            candidates: &[Cluster],
            context: &JobRequestContext,
        ) -> Result<Option<Cluster>, job_types::LoadBalancerError> {
            *self.seen.lock().unwrap() = Some(context.clone());
            Ok(candidates.iter().find(|c| c.id == "C").cloned())
        }

        fn order(&self) -> i32 {
            0
        }

        fn name(&self) -> &str {
            "inspecting"
        }
    }

    #[tokio::test]
    async fn balancers_see_each_candidates_own_command() {
        let catalog = catalog().await;
        catalog
            .save_command(Command::new(
                "spark-legacy",
                ResourceMetadata::new("spark-submit", "2"),
                CommandStatus::Active,
                vec!["spark-submit".into()],
            ))
            .await
            .unwrap();
        catalog
            .save_cluster(Cluster::new(
                "C",
                ResourceMetadata::new("C", "1").with_tags(["prod"]),
                ClusterStatus::Up,
            ))
            .await
            .unwrap();
        catalog
            .set_commands_for_cluster("C", vec!["spark-legacy".into()])
            .await
            .unwrap();

        let inspecting = Arc::new(Inspecting::default());
        let resolver = JobResolver::new(
            catalog,
            LoadBalancerChain::new(vec![inspecting.clone()]),
            SpecificationBuilder::new(ResolverSettings::default()),
        );
        let resolved = resolver.resolve("job-1", &request(vec![])).await.unwrap();

        let seen = inspecting.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.command_for("A"), Some("spark"));
        assert_eq!(seen.command_for("C"), Some("spark-legacy"));
        assert_eq!(resolved.cluster.id, "C");
        assert_eq!(resolved.command.id, "spark-legacy");
    }
}
