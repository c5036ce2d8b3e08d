//! Declarative resource criteria used to filter clusters, commands, and applications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Constraint set over a resource's id, name, version, status, and tags.
///
/// Absent fields do not constrain. Tags are case-sensitive and a criterion's tags
/// must be a subset of a resource's tags for the resource to match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    tags: BTreeSet<String>,
}

/// Returned when a criterion would constrain nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("criterion must constrain at least one of id, name, version, status, or tags")]
pub struct EmptyCriterion;

impl Criterion {
    /// Start building a criterion.
    pub fn builder() -> CriterionBuilder {
        CriterionBuilder::default()
    }

    /// Criterion matching only the given tags.
    pub fn with_tags<I, S>(tags: I) -> Result<Self, EmptyCriterion>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().tags(tags).build()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Copy of this criterion constrained to `status` unless it already names one.
    pub fn with_default_status(&self, status: &str) -> Self {
        if self.status.is_some() {
            return self.clone();
        }
        let mut c = self.clone();
        c.status = Some(status.to_string());
        c
    }

    /// True when no field constrains anything. Only reachable through deserialization.
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.name.is_none()
            && self.version.is_none()
            && self.status.is_none()
            && self.tags.is_empty()
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref id) = self.id {
            parts.push(format!("id={}", id));
        }
        if let Some(ref name) = self.name {
            parts.push(format!("name={}", name));
        }
        if let Some(ref version) = self.version {
            parts.push(format!("version={}", version));
        }
        if let Some(ref status) = self.status {
            parts.push(format!("status={}", status));
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            parts.push(format!("tags=[{}]", tags.join(",")));
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Builder for [`Criterion`]; blank strings are treated as absent.
#[derive(Debug, Default)]
pub struct CriterionBuilder {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    status: Option<String>,
    tags: BTreeSet<String>,
}

fn non_blank(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl CriterionBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = non_blank(id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = non_blank(name);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = non_blank(version);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = non_blank(status);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().filter_map(non_blank));
        self
    }

    pub fn build(self) -> Result<Criterion, EmptyCriterion> {
        let c = Criterion {
            id: self.id,
            name: self.name,
            version: self.version,
            status: self.status,
            tags: self.tags,
        };
        if c.is_empty() {
            return Err(EmptyCriterion);
        }
        Ok(c)
    }
}
