//! Server configuration from `JOBS_*` environment variables.
//!
//! Every field maps to `JOBS_<FIELD_NAME_IN_CAPS>`; e.g. `zombie_threshold_secs` is read from
//! `JOBS_ZOMBIE_THRESHOLD_SECS`. Unset variables keep their defaults.

use job_resolver::ResolverSettings;
use job_scheduler::{ReaperSettings, RetentionSettings};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "JOBS_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: expected a non-negative integer, got {value:?}")]
    InvalidNumber { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_zombie_threshold_secs")]
    pub zombie_threshold_secs: u64,
    #[serde(default = "default_zombie_interval_secs")]
    pub zombie_interval_secs: u64,
    #[serde(default = "default_zombie_jitter_secs")]
    pub zombie_jitter_secs: u64,
    #[serde(default = "default_status_message_max_len")]
    pub status_message_max_len: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_retention_batch_size")]
    pub retention_batch_size: usize,
    #[serde(default = "default_retention_interval_secs")]
    pub retention_interval_secs: u64,
    #[serde(default = "default_retention_max_runtime_secs")]
    pub retention_max_runtime_secs: u64,
    #[serde(default = "default_memory_mb")]
    pub default_memory_mb: u32,
    #[serde(default = "default_job_directory")]
    pub job_directory: PathBuf,
    /// Empty string disables archiving.
    #[serde(default = "default_archive_location")]
    pub archive_location: Option<String>,
    /// JSON catalog snapshot loaded at startup.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// SQLite database file; the in-memory store is used when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub agent_executable: Option<PathBuf>,
    #[serde(default)]
    pub agent_args: Vec<String>,
    #[serde(default)]
    pub agent_launch_url: Option<String>,
    #[serde(default)]
    pub agent_launch_token: Option<String>,
    #[serde(default)]
    pub load_balancer_script: Option<PathBuf>,
    #[serde(default = "default_load_balancer_timeout_secs")]
    pub load_balancer_timeout_secs: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_zombie_threshold_secs() -> u64 {
    1800
}
fn default_zombie_interval_secs() -> u64 {
    45
}
fn default_zombie_jitter_secs() -> u64 {
    15
}
fn default_status_message_max_len() -> usize {
    job_scheduler::DEFAULT_MAX_STATUS_MESSAGE_LEN
}
fn default_retention_days() -> u32 {
    10
}
fn default_retention_batch_size() -> usize {
    1000
}
fn default_retention_interval_secs() -> u64 {
    3600
}
fn default_retention_max_runtime_secs() -> u64 {
    300
}
fn default_memory_mb() -> u32 {
    1536
}
fn default_job_directory() -> PathBuf {
    PathBuf::from("/tmp/jobs")
}
fn default_archive_location() -> Option<String> {
    Some("file:///tmp/jobs/archives/".to_string())
}
fn default_load_balancer_timeout_secs() -> u64 {
    5
}
fn default_event_capacity() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            zombie_threshold_secs: default_zombie_threshold_secs(),
            zombie_interval_secs: default_zombie_interval_secs(),
            zombie_jitter_secs: default_zombie_jitter_secs(),
            status_message_max_len: default_status_message_max_len(),
            retention_days: default_retention_days(),
            retention_batch_size: default_retention_batch_size(),
            retention_interval_secs: default_retention_interval_secs(),
            retention_max_runtime_secs: default_retention_max_runtime_secs(),
            default_memory_mb: default_memory_mb(),
            job_directory: default_job_directory(),
            archive_location: default_archive_location(),
            catalog_path: None,
            db_path: None,
            agent_executable: None,
            agent_args: Vec::new(),
            agent_launch_url: None,
            agent_launch_token: None,
            load_balancer_script: None,
            load_balancer_timeout_secs: default_load_balancer_timeout_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from `lookup`, which maps a `JOBS_*` variable name to its value.
    ///
    /// Each value is coerced to the shape of the field's default (number, word list, or
    /// string) before deserializing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let Value::Object(defaults) = serde_json::to_value(Self::default())? else {
            return Ok(Self::default());
        };
        let mut fields = Map::new();
        for (field, default) in defaults {
            let key = format!("{ENV_PREFIX}{}", field.to_uppercase());
            let Some(raw) = lookup(&key) else {
                continue;
            };
            let value = match default {
                Value::Number(_) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Value::from)
                    .map_err(|_| ConfigError::InvalidNumber {
                        key: key.clone(),
                        value: raw.clone(),
                    })?,
                Value::Array(_) => Value::Array(
                    raw.split_whitespace()
                        .map(|s| Value::String(s.to_string()))
                        .collect(),
                ),
                _ if raw.is_empty() => Value::Null,
                _ => Value::String(raw),
            };
            fields.insert(field, value);
        }
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    pub fn reaper_settings(&self) -> ReaperSettings {
        ReaperSettings {
            threshold: Duration::from_secs(self.zombie_threshold_secs),
            interval: Duration::from_secs(self.zombie_interval_secs),
            jitter: Duration::from_secs(self.zombie_jitter_secs),
        }
    }

    pub fn retention_settings(&self) -> RetentionSettings {
        RetentionSettings {
            retention_days: self.retention_days,
            batch_size: self.retention_batch_size,
            interval: Duration::from_secs(self.retention_interval_secs),
            max_runtime: Duration::from_secs(self.retention_max_runtime_secs),
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            default_memory_mb: self.default_memory_mb,
            job_directory_root: self.job_directory.clone(),
            archive_location_prefix: self.archive_location.clone(),
        }
    }
}
