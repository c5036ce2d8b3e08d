//! Turns a resolved cluster/command/applications selection into a job specification.

use job_types::{
    Application, Cluster, Command, ComputeResources, EnvironmentProfile, JobRequest,
    JobSpecification,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Defaults applied when the request leaves a value open.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    pub default_memory_mb: u32,
    /// Parent of per-job working directories.
    pub job_directory_root: PathBuf,
    /// Prefix the job id is appended to, e.g. `file:///tmp/jobs/archives/`.
    pub archive_location_prefix: Option<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            default_memory_mb: 1536,
            job_directory_root: PathBuf::from("/tmp/jobs"),
            archive_location_prefix: Some("file:///tmp/jobs/archives/".to_string()),
        }
    }
}

/// Environment variable names exported to every job.
pub mod env {
    pub const JOB_ID: &str = "JOB_ID";
    pub const JOB_NAME: &str = "JOB_NAME";
    pub const JOB_USER: &str = "JOB_USER";
    pub const JOB_USER_GROUP: &str = "JOB_USER_GROUP";
    pub const JOB_MEMORY: &str = "JOB_MEMORY";
    pub const JOB_TAGS: &str = "JOB_TAGS";
    pub const JOB_GROUPING: &str = "JOB_GROUPING";
    pub const JOB_GROUPING_INSTANCE: &str = "JOB_GROUPING_INSTANCE";
    pub const JOB_CLUSTER_ID: &str = "JOB_CLUSTER_ID";
    pub const JOB_CLUSTER_NAME: &str = "JOB_CLUSTER_NAME";
    pub const JOB_CLUSTER_TAGS: &str = "JOB_CLUSTER_TAGS";
    pub const JOB_COMMAND_ID: &str = "JOB_COMMAND_ID";
    pub const JOB_COMMAND_NAME: &str = "JOB_COMMAND_NAME";
    pub const JOB_COMMAND_TAGS: &str = "JOB_COMMAND_TAGS";
    pub const JOB_REQUESTED_COMMAND_TAGS: &str = "JOB_REQUESTED_COMMAND_TAGS";
    /// Also exported per criterion with a `_<index>` suffix.
    pub const JOB_REQUESTED_CLUSTER_TAGS: &str = "JOB_REQUESTED_CLUSTER_TAGS";
}

/// Sorted, comma-joined tags with quotes escaped so they survive shell sourcing.
fn tags_to_string(tags: &BTreeSet<String>) -> String {
    tags.iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(",")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
}

#[derive(Debug, Clone, Default)]
pub struct SpecificationBuilder {
    settings: ResolverSettings,
}

impl SpecificationBuilder {
    pub fn new(settings: ResolverSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Memory: requested, else the command's default, else the configured default.
    pub fn job_memory(&self, request: &JobRequest, command: &Command) -> u32 {
        request
            .environment
            .memory_mb
            .or(command.memory_mb)
            .unwrap_or(self.settings.default_memory_mb)
    }

    pub fn build(
        &self,
        job_id: &str,
        request: &JobRequest,
        cluster: &Cluster,
        command: &Command,
        applications: &[Application],
    ) -> JobSpecification {
        let memory_mb = self.job_memory(request, command);

        // Later layers win: user request, command static env, profile, then JOB_* variables.
        let mut environment = request.environment.environment_variables.clone();
        environment.extend(command.environment.clone());
        environment.extend(profile_environment(command.profile, request, command));
        environment.extend(job_environment(job_id, request, cluster, command, memory_mb));

        let mut command_args = command.executable.clone();
        command_args.extend(request.command_args.iter().cloned());

        let job_directory = request
            .agent_config
            .job_directory
            .clone()
            .unwrap_or_else(|| self.settings.job_directory_root.clone())
            .join(job_id);

        JobSpecification {
            cluster_id: cluster.id.clone(),
            command_id: command.id.clone(),
            application_ids: applications.iter().map(|a| a.id.clone()).collect(),
            command_args,
            environment_variables: environment,
            job_directory,
            archive_location: self
                .settings
                .archive_location_prefix
                .as_ref()
                .map(|prefix| format!("{}{}", prefix, job_id)),
            timeout_secs: request.agent_config.timeout_secs,
            compute: ComputeResources {
                cpu: request.environment.cpu,
                memory_mb,
            },
        }
    }
}

fn job_environment(
    job_id: &str,
    request: &JobRequest,
    cluster: &Cluster,
    command: &Command,
    memory_mb: u32,
) -> BTreeMap<String, String> {
    let meta = &request.metadata;
    let mut vars = BTreeMap::new();
    let mut put = |k: &str, v: String| {
        vars.insert(k.to_string(), v);
    };
    put(env::JOB_ID, job_id.to_string());
    put(env::JOB_NAME, meta.name.clone());
    put(env::JOB_USER, meta.user.clone());
    put(env::JOB_USER_GROUP, meta.group.clone().unwrap_or_default());
    put(env::JOB_MEMORY, memory_mb.to_string());
    put(env::JOB_TAGS, tags_to_string(&meta.tags));
    put(env::JOB_GROUPING, meta.grouping.clone().unwrap_or_default());
    put(
        env::JOB_GROUPING_INSTANCE,
        meta.grouping_instance.clone().unwrap_or_default(),
    );
    put(env::JOB_CLUSTER_ID, cluster.id.clone());
    put(env::JOB_CLUSTER_NAME, cluster.metadata.name.clone());
    put(env::JOB_CLUSTER_TAGS, tags_to_string(&cluster.metadata.tags));
    put(env::JOB_COMMAND_ID, command.id.clone());
    put(env::JOB_COMMAND_NAME, command.metadata.name.clone());
    put(env::JOB_COMMAND_TAGS, tags_to_string(&command.metadata.tags));
    put(
        env::JOB_REQUESTED_COMMAND_TAGS,
        tags_to_string(request.criteria.command_criterion.tags()),
    );

    let mut all = Vec::with_capacity(request.criteria.cluster_criteria.len());
    for (i, criterion) in request.criteria.cluster_criteria.iter().enumerate() {
        let tags = tags_to_string(criterion.tags());
        put(&format!("{}_{}", env::JOB_REQUESTED_CLUSTER_TAGS, i), tags.clone());
        all.push(format!("[{}]", tags));
    }
    put(env::JOB_REQUESTED_CLUSTER_TAGS, format!("[{}]", all.join(",")));
    vars
}

/// Variables a command's runtime family expects on top of the common set.
fn profile_environment(
    profile: EnvironmentProfile,
    request: &JobRequest,
    command: &Command,
) -> BTreeMap<String, String> {
    let meta = &command.metadata;
    let user = request.metadata.user.clone();
    let group = request.metadata.group.clone().unwrap_or_default();
    let mut vars = BTreeMap::new();
    let mut from_metadata = |var: &str, key: &str| {
        if let Some(v) = meta.metadata_str(key) {
            vars.insert(var.to_string(), v.to_string());
        }
    };
    match profile {
        EnvironmentProfile::Generic => {}
        EnvironmentProfile::Hadoop => {
            from_metadata("HADOOP_HOME", "hadoop_home");
            from_metadata("HADOOP_CONF_DIR", "hadoop_conf_dir");
            vars.insert("HADOOP_USER_NAME".to_string(), user);
            vars.insert("HADOOP_GROUP_NAME".to_string(), group);
        }
        EnvironmentProfile::Spark => {
            from_metadata("SPARK_HOME", "spark_home");
            from_metadata("SPARK_CONF_DIR", "spark_conf_dir");
            from_metadata("HADOOP_CONF_DIR", "hadoop_conf_dir");
            vars.insert("HADOOP_USER_NAME".to_string(), user.clone());
            vars.insert("SPARK_USER".to_string(), user);
        }
        EnvironmentProfile::Presto => {
            from_metadata("PRESTO_SERVER", "presto_server");
            vars.insert("PRESTO_USER".to_string(), user);
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_types::{
        ApplicationStatus, ClusterStatus, CommandStatus, Criterion, ExecutionResourceCriteria,
        JobMetadata, ResourceMetadata,
    };

    fn request() -> JobRequest {
        let mut metadata = JobMetadata::new("nightly-etl", "alice");
        metadata.group = Some("data".into());
        metadata.tags = ["b", "a"].iter().map(|s| s.to_string()).collect();
        let mut req = JobRequest::new(
            metadata,
            ExecutionResourceCriteria {
                cluster_criteria: vec![
                    Criterion::with_tags(["prod", "gpu"]).unwrap(),
                    Criterion::with_tags(["adhoc"]).unwrap(),
                ],
                command_criterion: Criterion::with_tags(["type:spark"]).unwrap(),
                application_ids: vec![],
            },
        );
        req.command_args = vec!["--class".into(), "Main".into()];
        req.environment
            .environment_variables
            .insert("JOB_ID".into(), "spoofed".into());
        req
    }

    fn cluster() -> Cluster {
        Cluster::new(
            "A",
            ResourceMetadata::new("prod-a", "1").with_tags(["prod", "gpu"]),
            ClusterStatus::Up,
        )
    }

    fn command() -> Command {
        let mut meta = ResourceMetadata::new("spark-submit", "3.5").with_tags(["type:spark"]);
        meta.metadata
            .insert("spark_home".into(), serde_json::json!("/opt/spark"));
        let mut cmd = Command::new(
            "spark",
            meta,
            CommandStatus::Active,
            vec!["spark-submit".into(), "--master".into(), "yarn".into()],
        )
        .with_profile(EnvironmentProfile::Spark);
        cmd.memory_mb = Some(4096);
        cmd
    }

    #[test]
    fn builds_spec_with_defaults_and_overrides() {
        let builder = SpecificationBuilder::default();
        let apps = vec![Application::new(
            "spark-app",
            ResourceMetadata::new("spark", "3.5"),
            ApplicationStatus::Active,
        )];
        let spec = builder.build("job-1", &request(), &cluster(), &command(), &apps);

        assert_eq!(spec.cluster_id, "A");
        assert_eq!(spec.command_id, "spark");
        assert_eq!(spec.application_ids, vec!["spark-app"]);
        assert_eq!(
            spec.command_args,
            vec!["spark-submit", "--master", "yarn", "--class", "Main"]
        );
        assert_eq!(spec.compute.memory_mb, 4096);
        assert_eq!(spec.job_directory, PathBuf::from("/tmp/jobs/job-1"));
        assert_eq!(
            spec.archive_location.as_deref(),
            Some("file:///tmp/jobs/archives/job-1")
        );

        let env = &spec.environment_variables;
        assert_eq!(env["JOB_ID"], "job-1");
        assert_eq!(env["JOB_TAGS"], "a,b");
        assert_eq!(env["JOB_MEMORY"], "4096");
        assert_eq!(env["JOB_REQUESTED_CLUSTER_TAGS_0"], "gpu,prod");
        assert_eq!(env["JOB_REQUESTED_CLUSTER_TAGS"], "[[gpu,prod],[adhoc]]");
        assert_eq!(env["SPARK_HOME"], "/opt/spark");
        assert_eq!(env["SPARK_USER"], "alice");
    }

    #[test]
    fn memory_falls_back_to_configured_default() {
        let builder = SpecificationBuilder::new(ResolverSettings {
            default_memory_mb: 2048,
            ..ResolverSettings::default()
        });
        let mut cmd = command();
        cmd.memory_mb = None;
        assert_eq!(builder.job_memory(&request(), &cmd), 2048);
        let mut req = request();
        req.environment.memory_mb = Some(512);
        assert_eq!(builder.job_memory(&req, &cmd), 512);
    }

    #[test]
    fn hadoop_profile_exports_user_and_group() {
        let cmd = command().with_profile(EnvironmentProfile::Hadoop);
        let vars = profile_environment(EnvironmentProfile::Hadoop, &request(), &cmd);
        assert_eq!(vars["HADOOP_USER_NAME"], "alice");
        assert_eq!(vars["HADOOP_GROUP_NAME"], "data");
        assert!(!vars.contains_key("SPARK_HOME"));
    }

    #[test]
    fn tags_escape_quotes() {
        let tags: BTreeSet<String> = ["it's".to_string()].into_iter().collect();
        assert_eq!(tags_to_string(&tags), "it\\'s");
    }
}
