//! Execution resources: clusters, commands, and applications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

/// Common view over catalog resources used by criterion matching.
pub trait Resource {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    /// Status rendered the way criteria name it (e.g. `UP`, `ACTIVE`).
    fn status_name(&self) -> &'static str;
    fn tags(&self) -> &BTreeSet<String>;
}

/// Mutable descriptive metadata shared by every resource kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form key/value metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ResourceMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tags: BTreeSet::new(),
            description: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// String value of a free-form metadata key, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! resource_status {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownStatus {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

resource_status!(
    /// Cluster availability.
    ClusterStatus, "cluster", {
        Up => "UP",
        OutOfService => "OUT_OF_SERVICE",
        Terminated => "TERMINATED",
    }
);

resource_status!(
    /// Command lifecycle.
    CommandStatus, "command", {
        Active => "ACTIVE",
        Deprecated => "DEPRECATED",
        Inactive => "INACTIVE",
    }
);

resource_status!(
    /// Application lifecycle.
    ApplicationStatus, "application", {
        Active => "ACTIVE",
        Deprecated => "DEPRECATED",
        Inactive => "INACTIVE",
    }
);

impl ClusterStatus {
    /// Status implicitly required when a criterion does not name one.
    pub const DEFAULT_FILTER: ClusterStatus = ClusterStatus::Up;
}

impl CommandStatus {
    pub const DEFAULT_FILTER: CommandStatus = CommandStatus::Active;
}

/// Which environment contributions a command needs at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentProfile {
    #[default]
    Generic,
    Hadoop,
    Spark,
    Presto,
}

/// A compute cluster jobs can run on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub metadata: ResourceMetadata,
    pub status: ClusterStatus,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

impl Cluster {
    pub fn new(id: impl Into<String>, metadata: ResourceMetadata, status: ClusterStatus) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            metadata,
            status,
            created: now,
            updated: now,
        }
    }
}

/// An executable that jobs request by criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub metadata: ResourceMetadata,
    pub status: CommandStatus,
    /// Executable followed by its fixed arguments.
    #[serde(default)]
    pub executable: Vec<String>,
    /// Default memory in MB when the request does not ask for any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    #[serde(default)]
    pub profile: EnvironmentProfile,
    /// Static environment contributed to every job running this command.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

impl Command {
    pub fn new(
        id: impl Into<String>,
        metadata: ResourceMetadata,
        status: CommandStatus,
        executable: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            metadata,
            status,
            executable,
            memory_mb: None,
            profile: EnvironmentProfile::Generic,
            environment: BTreeMap::new(),
            created: now,
            updated: now,
        }
    }

    pub fn with_profile(mut self, profile: EnvironmentProfile) -> Self {
        self.profile = profile;
        self
    }
}

/// A bundle of binaries or configuration installed alongside a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub metadata: ResourceMetadata,
    pub status: ApplicationStatus,
    /// Application type, e.g. `spark` or `hadoop`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

impl Application {
    pub fn new(
        id: impl Into<String>,
        metadata: ResourceMetadata,
        status: ApplicationStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            metadata,
            status,
            kind: None,
            created: now,
            updated: now,
        }
    }
}

macro_rules! impl_resource {
    ($ty:ty) => {
        impl Resource for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn name(&self) -> &str {
                &self.metadata.name
            }

            fn version(&self) -> &str {
                &self.metadata.version
            }

            fn status_name(&self) -> &'static str {
                self.status.as_str()
            }

            fn tags(&self) -> &BTreeSet<String> {
                &self.metadata.tags
            }
        }
    };
}

impl_resource!(Cluster);
impl_resource!(Command);
impl_resource!(Application);
